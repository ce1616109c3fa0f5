//! Text protocol command parser (§4.16).

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimMode {
    Vectors,
    Events,
    Fusion,
}

impl SimMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimMode::Vectors => "vectors",
            SimMode::Events => "events",
            SimMode::Fusion => "fusion",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "vectors" => Ok(SimMode::Vectors),
            "events" => Ok(SimMode::Events),
            "fusion" => Ok(SimMode::Fusion),
            other => Err(Error::CommandSyntaxError(format!("unknown SIM mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSub {
    Help,
    Show,
    Verify(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DumpSub {
    Save(Option<String>),
    Load(Option<String>),
    Verify(Option<String>),
    Info(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheSub {
    Stats,
    Clear,
    Enable,
    Disable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Event { ctx: String, item_id: String, score: i64 },
    VecSet { id: String, values: Vec<f32> },
    Sim { id: String, k: i64, mode: SimMode },
    SimV { k: i64, values: Vec<f32> },
    Info,
    Config(ConfigSub),
    Dump(DumpSub),
    DebugOn,
    DebugOff,
    Cache(CacheSub),
}

/// Parses one whitespace-separated, case-insensitive protocol line.
pub fn parse_command(line: &str) -> Result<Command> {
    let mut parts = line.split_whitespace();
    let keyword = parts
        .next()
        .ok_or_else(|| Error::CommandSyntaxError("empty command".to_string()))?
        .to_uppercase();
    let rest: Vec<&str> = parts.collect();

    match keyword.as_str() {
        "EVENT" => parse_event(&rest),
        "VECSET" => parse_vecset(&rest),
        "SIM" => parse_sim(&rest),
        "SIMV" => parse_simv(&rest),
        "INFO" => {
            if !rest.is_empty() {
                return Err(Error::CommandSyntaxError("INFO takes no arguments".to_string()));
            }
            Ok(Command::Info)
        }
        "CONFIG" => parse_config(&rest),
        "DUMP" => parse_dump(&rest),
        "DEBUG" => parse_debug(&rest),
        "CACHE" => parse_cache(&rest),
        other => Err(Error::CommandUnknown(other.to_string())),
    }
}

fn parse_event(rest: &[&str]) -> Result<Command> {
    let [ctx, id, score] = rest else {
        return Err(Error::CommandSyntaxError(
            "usage: EVENT <ctx> <id> <score>".to_string(),
        ));
    };
    let score: i64 = score
        .parse()
        .map_err(|_| Error::CommandInvalidArgument(format!("invalid score: {score}")))?;
    Ok(Command::Event {
        ctx: ctx.to_string(),
        item_id: id.to_string(),
        score,
    })
}

fn parse_vecset(rest: &[&str]) -> Result<Command> {
    let [id, values @ ..] = rest else {
        return Err(Error::CommandSyntaxError(
            "usage: VECSET <id> <f1> ... <fN>".to_string(),
        ));
    };
    if values.is_empty() {
        return Err(Error::CommandInvalidVector("vector must have at least one component".to_string()));
    }
    let parsed = parse_floats(values)?;
    Ok(Command::VecSet {
        id: id.to_string(),
        values: parsed,
    })
}

fn parse_sim(rest: &[&str]) -> Result<Command> {
    if rest.len() < 2 {
        return Err(Error::CommandSyntaxError(
            "usage: SIM <id> <k> [using=vectors|events|fusion]".to_string(),
        ));
    }
    let id = rest[0].to_string();
    let k: i64 = rest[1]
        .parse()
        .map_err(|_| Error::CommandInvalidArgument(format!("invalid k: {}", rest[1])))?;
    let mode = if rest.len() >= 3 {
        let modifier = rest[2];
        let value = modifier
            .strip_prefix("using=")
            .ok_or_else(|| Error::CommandSyntaxError(format!("unrecognized SIM modifier: {modifier}")))?;
        SimMode::parse(value)?
    } else {
        SimMode::Fusion
    };
    Ok(Command::Sim { id, k, mode })
}

fn parse_simv(rest: &[&str]) -> Result<Command> {
    let [k, values @ ..] = rest else {
        return Err(Error::CommandSyntaxError(
            "usage: SIMV <k> <f1> ... <fN>".to_string(),
        ));
    };
    let k: i64 = k
        .parse()
        .map_err(|_| Error::CommandInvalidArgument(format!("invalid k: {k}")))?;
    if values.is_empty() {
        return Err(Error::CommandInvalidVector("vector must have at least one component".to_string()));
    }
    let parsed = parse_floats(values)?;
    Ok(Command::SimV { k, values: parsed })
}

fn parse_floats(values: &[&str]) -> Result<Vec<f32>> {
    values
        .iter()
        .map(|v| {
            v.parse::<f32>()
                .map_err(|_| Error::CommandInvalidVector(format!("invalid float: {v}")))
        })
        .collect()
}

fn parse_config(rest: &[&str]) -> Result<Command> {
    let sub = rest
        .first()
        .ok_or_else(|| Error::CommandSyntaxError("usage: CONFIG HELP|SHOW|VERIFY [path]".to_string()))?
        .to_uppercase();
    match sub.as_str() {
        "HELP" => Ok(Command::Config(ConfigSub::Help)),
        "SHOW" => Ok(Command::Config(ConfigSub::Show)),
        "VERIFY" => Ok(Command::Config(ConfigSub::Verify(rest.get(1).map(|s| s.to_string())))),
        other => Err(Error::CommandSyntaxError(format!("unknown CONFIG subcommand: {other}"))),
    }
}

fn parse_dump(rest: &[&str]) -> Result<Command> {
    let sub = rest
        .first()
        .ok_or_else(|| Error::CommandSyntaxError("usage: DUMP SAVE|LOAD|VERIFY|INFO [path]".to_string()))?
        .to_uppercase();
    let path = rest.get(1).map(|s| s.to_string());
    match sub.as_str() {
        "SAVE" => Ok(Command::Dump(DumpSub::Save(path))),
        "LOAD" => Ok(Command::Dump(DumpSub::Load(path))),
        "VERIFY" => Ok(Command::Dump(DumpSub::Verify(path))),
        "INFO" => Ok(Command::Dump(DumpSub::Info(path))),
        other => Err(Error::CommandSyntaxError(format!("unknown DUMP subcommand: {other}"))),
    }
}

fn parse_debug(rest: &[&str]) -> Result<Command> {
    let sub = rest
        .first()
        .ok_or_else(|| Error::CommandSyntaxError("usage: DEBUG ON|OFF".to_string()))?
        .to_uppercase();
    match sub.as_str() {
        "ON" => Ok(Command::DebugOn),
        "OFF" => Ok(Command::DebugOff),
        other => Err(Error::CommandSyntaxError(format!("unknown DEBUG subcommand: {other}"))),
    }
}

fn parse_cache(rest: &[&str]) -> Result<Command> {
    let sub = rest
        .first()
        .ok_or_else(|| Error::CommandSyntaxError("usage: CACHE STATS|CLEAR|ENABLE|DISABLE".to_string()))?
        .to_uppercase();
    match sub.as_str() {
        "STATS" => Ok(Command::Cache(CacheSub::Stats)),
        "CLEAR" => Ok(Command::Cache(CacheSub::Clear)),
        "ENABLE" => Ok(Command::Cache(CacheSub::Enable)),
        "DISABLE" => Ok(Command::Cache(CacheSub::Disable)),
        other => Err(Error::CommandSyntaxError(format!("unknown CACHE subcommand: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event() {
        let cmd = parse_command("EVENT u1 item1 10").unwrap();
        assert_eq!(
            cmd,
            Command::Event {
                ctx: "u1".to_string(),
                item_id: "item1".to_string(),
                score: 10
            }
        );
    }

    #[test]
    fn commands_are_case_insensitive() {
        assert_eq!(parse_command("event u1 item1 10"), parse_command("EVENT u1 item1 10"));
    }

    #[test]
    fn parses_vecset() {
        let cmd = parse_command("VECSET a 1 0 0.5").unwrap();
        assert_eq!(
            cmd,
            Command::VecSet {
                id: "a".to_string(),
                values: vec![1.0, 0.0, 0.5]
            }
        );
    }

    #[test]
    fn parses_sim_with_default_mode() {
        let cmd = parse_command("SIM a 5").unwrap();
        assert_eq!(
            cmd,
            Command::Sim {
                id: "a".to_string(),
                k: 5,
                mode: SimMode::Fusion
            }
        );
    }

    #[test]
    fn parses_sim_with_explicit_mode() {
        let cmd = parse_command("SIM a 5 using=vectors").unwrap();
        assert_eq!(
            cmd,
            Command::Sim {
                id: "a".to_string(),
                k: 5,
                mode: SimMode::Vectors
            }
        );
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(matches!(parse_command("BOGUS x"), Err(Error::CommandUnknown(_))));
    }

    #[test]
    fn invalid_vector_component_is_an_error() {
        assert!(matches!(
            parse_command("VECSET a not-a-float"),
            Err(Error::CommandInvalidVector(_))
        ));
    }

    #[test]
    fn empty_line_is_a_syntax_error() {
        assert!(matches!(parse_command(""), Err(Error::CommandSyntaxError(_))));
        assert!(matches!(parse_command("   "), Err(Error::CommandSyntaxError(_))));
    }

    #[test]
    fn parses_dump_with_path() {
        let cmd = parse_command("DUMP SAVE my.dmp").unwrap();
        assert_eq!(cmd, Command::Dump(DumpSub::Save(Some("my.dmp".to_string()))));
    }

    #[test]
    fn parses_cache_subcommands() {
        assert_eq!(parse_command("CACHE STATS").unwrap(), Command::Cache(CacheSub::Stats));
        assert_eq!(parse_command("cache clear").unwrap(), Command::Cache(CacheSub::Clear));
    }
}

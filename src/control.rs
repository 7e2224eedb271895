//! Line commands accepted on stdin by `watchbell run`.
//!
//! ```text
//! add <id> <container> <group> <every-minutes> <title...>
//! remove <id> [group]
//! pause <id> | resume <id> | remind <id>
//! list | status | help | quit
//! ```

use anyhow::{Context, Result, bail};

#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Add {
        id: String,
        container: String,
        group: String,
        every: f64,
        title: String,
    },
    Remove {
        id: String,
        group: Option<String>,
    },
    Pause(String),
    Resume(String),
    Remind(String),
    List,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "commands: add <id> <container> <group> <every-minutes> <title...> | \
remove <id> [group] | pause <id> | resume <id> | remind <id> | list | status | quit";

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ControlCommand>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let parts: Vec<&str> = line.split_whitespace().collect();
    let id = |verb: &str| -> Result<String> {
        match parts.as_slice() {
            [_, id] => Ok((*id).to_string()),
            _ => bail!("usage: {verb} <id>"),
        }
    };

    let command = match parts[0].to_ascii_lowercase().as_str() {
        "add" => {
            if parts.len() < 6 {
                bail!("usage: add <id> <container> <group> <every-minutes> <title...>");
            }
            let every: f64 = parts[4]
                .parse()
                .with_context(|| format!("'{}' is not a number of minutes", parts[4]))?;
            ControlCommand::Add {
                id: parts[1].to_string(),
                container: parts[2].to_string(),
                group: parts[3].to_string(),
                every,
                title: parts[5..].join(" "),
            }
        }
        "remove" | "rm" => match parts.as_slice() {
            [_, id] => ControlCommand::Remove {
                id: (*id).to_string(),
                group: None,
            },
            [_, id, group] => ControlCommand::Remove {
                id: (*id).to_string(),
                group: Some((*group).to_string()),
            },
            _ => bail!("usage: remove <id> [group]"),
        },
        "pause" => ControlCommand::Pause(id("pause")?),
        "resume" => ControlCommand::Resume(id("resume")?),
        "remind" => ControlCommand::Remind(id("remind")?),
        "list" | "ls" => ControlCommand::List,
        "status" => ControlCommand::Status,
        "help" | "?" => ControlCommand::Help,
        "quit" | "exit" => ControlCommand::Quit,
        other => bail!("unknown command '{other}' (try 'help')"),
    };
    Ok(Some(command))
}

//! Line-oriented text front end, used by the demo binary and tests.
//!
//! ```text
//! press F1        # key down
//! release F1      # key up
//! tap JOY:0:4     # down then up
//! say brake bias up
//! F5              # same as tap
//! ```

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{InputError, InputResult};
use crate::event::InputPhase;
use crate::hub::InputSender;
use crate::id::InputId;

/// Parse one command line into raw transitions. Blank lines and `#`
/// comments yield nothing.
pub fn parse_command(line: &str) -> InputResult<Vec<(InputId, InputPhase)>> {
    let line = line.split('#').next().unwrap_or_default().trim();
    if line.is_empty() {
        return Ok(Vec::new());
    }
    let (verb, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(v, r)| (v, r.trim()));

    let transitions = match verb.to_ascii_lowercase().as_str() {
        "press" | "down" => vec![(require(rest, line)?, InputPhase::Pressed)],
        "release" | "up" => vec![(require(rest, line)?, InputPhase::Released)],
        "tap" => {
            let id = require(rest, line)?;
            vec![(id.clone(), InputPhase::Pressed), (id, InputPhase::Released)]
        }
        "say" => vec![(InputId::voice(rest)?, InputPhase::Pressed)],
        _ if rest.is_empty() => {
            let id = InputId::parse(verb)?;
            vec![(id.clone(), InputPhase::Pressed), (id, InputPhase::Released)]
        }
        _ => return Err(InputError::UnknownCommand(line.to_string())),
    };
    Ok(transitions)
}

fn require(arg: &str, line: &str) -> InputResult<InputId> {
    if arg.is_empty() {
        return Err(InputError::UnknownCommand(line.to_string()));
    }
    InputId::parse(arg)
}

/// Feed commands from any async line reader until EOF.
pub fn spawn_line_source<R>(reader: R, mut sender: InputSender) -> JoinHandle<InputResult<()>>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    warn!(source = sender.name(), error = %err, "input read failed");
                    break;
                }
            };
            match parse_command(&line) {
                Ok(transitions) => {
                    for (id, phase) in transitions {
                        sender.send(id, phase).await?;
                    }
                }
                Err(err) => warn!(source = sender.name(), error = %err, "ignoring input line"),
            }
        }
        debug!(source = sender.name(), "text input ended");
        sender.disconnect().await
    })
}

/// Read commands from standard input.
pub fn spawn_stdin(sender: InputSender) -> JoinHandle<InputResult<()>> {
    spawn_line_source(BufReader::new(tokio::io::stdin()), sender)
}

//! Shell command parsing
//!
//! The command word is matched case-insensitively; arguments are kept as
//! typed.

use std::fmt;

/// Informational queries answered by the BMS on a response id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    GetRtc,
    BootTimestamp,
    Uptime,
    McuWaferInfo,
    McuLotNumber,
    McuId,
    SoftwareVersion,
    CommitHash,
    BuildConfig,
}

/// Argument of the `log` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogArg {
    Subscribe { msg_id: u32, count: u32 },
    Stop,
}

/// A parsed shell command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Init,
    Fram,
    Rtc,
    Query(Query),
    SoftwareReset,
    Log(LogArg),
    Exit,
    Help,
    Status,
}

impl Command {
    /// Commands available before `init`
    pub fn needs_session(&self) -> bool {
        !matches!(self, Command::Init | Command::Exit | Command::Help | Command::Status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Empty line
    Empty,
    /// Unknown command; holds the whole line
    Invalid(String),
    /// Malformed `log` arguments
    LogUsage(String),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Empty => Ok(()),
            CommandError::Invalid(line) => write!(f, "Invalid command: {}", line),
            CommandError::LogUsage(reason) => write!(
                f,
                "{} Usage: LOG <id> [<count>] or LOG STOP, with <id> as 300, 0x12C or 12Ch.",
                reason
            ),
        }
    }
}

/// Text of the `help` command
pub const HELP: &str = "\
Commands:
  init             connect to the BMS
  fram             reinitialize the FRAM
  rtc              set the BMS real time clock to the local time
  getrtc           read the real time clock
  boottimestamp    read the boot timestamp
  uptime           read the uptime
  mcuwaferinfo     read the MCU wafer information
  mculotnumber     read the MCU lot number
  mcuid            read the MCU unique die id
  softwareversion  read the software version
  commithash       read the commit hash
  buildconfig      read the build configuration
  softwarereset    reset the BMS
  log <id> [<n>]   print the next <n> messages with id <id>
  log stop         stop printing messages
  status           show the session state
  help             show this text
  exit             disconnect, or quit when not connected";

/// Parse a frame id given as `300`, `0x12C` or `12Ch`
pub fn parse_msg_id(text: &str) -> Option<u32> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    if let Some(hex) = text.strip_suffix('h').or_else(|| text.strip_suffix('H')) {
        return u32::from_str_radix(hex, 16).ok();
    }
    if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
        return text.parse().ok();
    }
    None
}

fn parse_log(args: &[&str]) -> Result<LogArg, CommandError> {
    match args {
        [] => Err(CommandError::LogUsage("Missing message ID.".to_string())),
        [stop] if stop.eq_ignore_ascii_case("stop") => Ok(LogArg::Stop),
        [id] | [id, _] => {
            let msg_id = parse_msg_id(id).ok_or_else(|| {
                CommandError::LogUsage(format!("'{}' is not a valid message ID.", id))
            })?;
            let count = match args.get(1) {
                None => 1,
                Some(n) => n
                    .parse::<u32>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| {
                        CommandError::LogUsage(format!("'{}' is not a positive number.", n))
                    })?,
            };
            Ok(LogArg::Subscribe { msg_id, count })
        }
        _ => Err(CommandError::LogUsage("Too many arguments.".to_string())),
    }
}

/// Parse one input line
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let mut tokens = line.split_whitespace();
    let Some(word) = tokens.next() else {
        return Err(CommandError::Empty);
    };
    let args: Vec<&str> = tokens.collect();
    let word = word.to_lowercase();

    if word == "log" {
        return parse_log(&args).map(Command::Log);
    }
    if !args.is_empty() {
        return Err(CommandError::Invalid(line.trim().to_string()));
    }

    let command = match word.as_str() {
        "init" => Command::Init,
        "fram" => Command::Fram,
        "rtc" => Command::Rtc,
        "getrtc" => Command::Query(Query::GetRtc),
        "boottimestamp" => Command::Query(Query::BootTimestamp),
        "uptime" => Command::Query(Query::Uptime),
        "mcuwaferinfo" => Command::Query(Query::McuWaferInfo),
        "mculotnumber" => Command::Query(Query::McuLotNumber),
        "mcuid" => Command::Query(Query::McuId),
        "softwareversion" => Command::Query(Query::SoftwareVersion),
        "commithash" => Command::Query(Query::CommitHash),
        "buildconfig" => Command::Query(Query::BuildConfig),
        "softwarereset" => Command::SoftwareReset,
        "exit" => Command::Exit,
        "help" => Command::Help,
        "status" => Command::Status,
        _ => return Err(CommandError::Invalid(line.trim().to_string())),
    };
    Ok(command)
}

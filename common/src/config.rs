use std::fmt;
use std::io::{BufRead, Write};
use std::ops::RangeInclusive;
use std::path::Path;

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default location of the key=value configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/tns/tns_config.conf";

/// Pulse period range, in units of 10 ms. 0 stops pulse generation.
pub const PULSE_PERIOD_RANGE: RangeInclusive<u32> = 0..=128;
/// Start SFN range. 1024 means "next available frame".
pub const START_SFN_RANGE: RangeInclusive<u32> = 0..=1024;
/// Report period range, in units of 10 ms. 0 disables pulse report indications.
pub const REPORT_PERIOD_RANGE: RangeInclusive<u32> = 0..=128;

/// Which boundary the generated pulse is aligned to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PulseAlignType {
    #[default]
    FrameBoundary = 0,
    UtcSecondBoundary = 1,
}

impl PulseAlignType {
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(Self::FrameBoundary),
            1 => Some(Self::UtcSecondBoundary),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::FrameBoundary => "NR5G frame",
            Self::UtcSecondBoundary => "UTC second",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PulseTriggerAction {
    #[default]
    Trigger = 0,
    Skip = 1,
}

impl PulseTriggerAction {
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(Self::Trigger),
            1 => Some(Self::Skip),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Trigger => "Trigger",
            Self::Skip => "Skip",
        }
    }
}

/// Parameters of NR5G sync pulse generation.
///
/// The loaders below guarantee every field is within its documented range: numeric fields are
/// clamped to their maximum, enum and flag fields fall back to their default when the raw value
/// is neither 0 nor 1.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SyncPulseConfig {
    /// Pulse period in units of 10 ms, 0 = stop.
    pub pulse_period: u32,
    /// First SFN to generate the pulse at, 1024 = next available SFN.
    pub start_sfn: u32,
    /// Period of pulse report indications in units of 10 ms, 0 = disabled.
    pub report_period: u32,
    pub pulse_align_type: PulseAlignType,
    pub pulse_trigger_action: PulseTriggerAction,
    /// Latch the CXO counter with each pulse.
    pub pulse_get_cxo_count: bool,
}

impl Default for SyncPulseConfig {
    fn default() -> Self {
        Self::load_defaults()
    }
}

impl fmt::Display for SyncPulseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pulse_period={}, start_sfn={}, report_period={}, align_type={}, trigger_action={}, \
             get_cxo={}",
            self.pulse_period,
            self.start_sfn,
            self.report_period,
            self.pulse_align_type as u8,
            self.pulse_trigger_action as u8,
            u8::from(self.pulse_get_cxo_count),
        )
    }
}

impl SyncPulseConfig {
    /// The baseline configuration: 100 ms pulses starting at the next available SFN, reported
    /// every 100 ms, aligned to NR5G frames.
    pub const fn load_defaults() -> Self {
        Self {
            pulse_period: 10,
            start_sfn: 1024,
            report_period: 10,
            pulse_align_type: PulseAlignType::FrameBoundary,
            pulse_trigger_action: PulseTriggerAction::Trigger,
            pulse_get_cxo_count: false,
        }
    }

    /// Applies `key=value` lines from `source` on top of `defaults`.
    ///
    /// Blank lines, lines starting with `#` and lines without `=` are skipped. Unknown keys are
    /// logged and ignored. Values are parsed the way C `strtoul(value, NULL, 0)` does, so `0x`
    /// hex and leading-zero octal work, and then clamped into range. This never fails; a read
    /// error stops the parsing and keeps whatever was applied so far.
    pub fn load_overrides<R: BufRead>(source: R, defaults: Self) -> Self {
        let mut config = defaults;
        for line in source.lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    error!("Error while reading config: {err}");
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            config.apply(key.trim(), value.trim());
        }

        info!("Config loaded: {config}");
        config
    }

    /// Loads overrides from the file at `path`.
    ///
    /// Returns an error if the file cannot be opened. Callers are expected to continue with
    /// `defaults`, see [`SyncPulseConfig::load_file_or_defaults`].
    pub fn load_file(path: &Path, defaults: Self) -> crate::Result<Self> {
        let file = std::fs::File::open(path).map_err(|err| Error::ConfigUnreadable {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        info!("Loading config from '{}'", path.display());
        Ok(Self::load_overrides(std::io::BufReader::new(file), defaults))
    }

    pub fn load_file_or_defaults(path: &Path, defaults: Self) -> Self {
        Self::load_file(path, defaults).unwrap_or_else(|err| {
            error!("{err}, using defaults");
            defaults
        })
    }

    /// Asks for pulse period, start SFN and report period on `output`, reading answers from
    /// `input`. The remaining fields are taken from `defaults`.
    pub fn prompt<R: BufRead, W: Write>(
        input: &mut R,
        output: &mut W,
        defaults: Self,
    ) -> crate::Result<Self> {
        let mut config = defaults;
        config.pulse_period = prompt_value(
            input,
            output,
            "Enter pulse period (range: 0 - 128, in multiple of 10 milliseconds): ",
            PULSE_PERIOD_RANGE,
        )?;
        config.start_sfn = prompt_value(
            input,
            output,
            "Enter system frame number (range: 0 - 1024, 1024 = next available sfn): ",
            START_SFN_RANGE,
        )?;
        config.report_period = prompt_value(
            input,
            output,
            "Enter pulse generation indication periodicity (range: 0 - 128, in multiple of 10 \
             milliseconds, 0 = disabled): ",
            REPORT_PERIOD_RANGE,
        )?;
        info!(
            "Configuration: pulse_period={}, start_sfn={}, report_period={}",
            config.pulse_period, config.start_sfn, config.report_period
        );
        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) {
        let raw = parse_c_ulong(value);
        match key {
            "pulse_period" => self.pulse_period = clamp(raw, PULSE_PERIOD_RANGE),
            "start_sfn" => self.start_sfn = clamp(raw, START_SFN_RANGE),
            "report_period" => self.report_period = clamp(raw, REPORT_PERIOD_RANGE),
            "pulse_align_type" => {
                self.pulse_align_type = PulseAlignType::from_raw(raw).unwrap_or_default()
            }
            "pulse_trigger_action" => {
                self.pulse_trigger_action = PulseTriggerAction::from_raw(raw).unwrap_or_default()
            }
            "pulse_get_cxo_count" => self.pulse_get_cxo_count = raw == 1,
            _ => {
                info!("Unknown config key: '{key}'");
                return;
            }
        }
        info!("Config key '{key}' set from '{value}'");
    }
}

fn clamp(raw: u64, range: RangeInclusive<u32>) -> u32 {
    raw.min(u64::from(*range.end())) as u32
}

/// Parses an unsigned number with C `strtoul` base-0 rules.
///
/// Leading whitespace and an optional sign are accepted, parsing stops at the first invalid
/// digit, no digits yields 0, a minus sign wraps around like in C. Overflow saturates, with or
/// without a sign.
fn parse_c_ulong(value: &str) -> u64 {
    let value = value.trim_start();
    let (negative, value) = match value.as_bytes().first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };
    let (digits, radix) = if let Some(hex) =
        value.strip_prefix("0x").or_else(|| value.strip_prefix("0X"))
        && hex.starts_with(|c: char| c.is_ascii_hexdigit())
    {
        (hex, 16)
    } else if value.len() > 1 && value.starts_with('0') {
        (&value[1..], 8)
    } else {
        (value, 10)
    };
    let end = digits.find(|c: char| !c.is_digit(radix)).unwrap_or(digits.len());
    if end == 0 {
        return 0;
    }
    match u64::from_str_radix(&digits[..end], radix) {
        Ok(parsed) if negative => parsed.wrapping_neg(),
        Ok(parsed) => parsed,
        Err(_) => u64::MAX,
    }
}

/// Validates one interactive answer: a whole decimal number within `range`, leading whitespace
/// allowed.
pub fn parse_prompt_value(text: &str, range: RangeInclusive<u32>) -> crate::Result<u32> {
    let value = text
        .trim_start()
        .trim_end_matches(['\r', '\n'])
        .parse::<u64>()
        .map_err(|_| Error::ParseError)?;
    if value < u64::from(*range.start()) || value > u64::from(*range.end()) {
        return Err(Error::OutOfRange {
            value,
            min: *range.start(),
            max: *range.end(),
        });
    }
    Ok(value as u32)
}

/// Prompts until a valid value is entered. Fails only when `input` is exhausted.
pub fn prompt_value<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    prompt: &str,
    range: RangeInclusive<u32>,
) -> crate::Result<u32> {
    let mut line = String::new();
    loop {
        // Prompt output is best effort, a closed stdout must not prevent configuration
        let _ = write!(output, "{prompt}");
        let _ = output.flush();

        line.clear();
        match input.read_line(&mut line) {
            Ok(0) => return Err(Error::InputClosed),
            Ok(_) => {}
            Err(err) => {
                error!("Failed to read input: {err}");
                return Err(Error::InputClosed);
            }
        }

        match parse_prompt_value(&line, range.clone()) {
            Ok(value) => return Ok(value),
            Err(Error::OutOfRange { min, max, .. }) => {
                let _ = writeln!(
                    output,
                    "Out of range. Please enter a value between {min} and {max}."
                );
            }
            Err(_) => {
                let _ = writeln!(
                    output,
                    "Invalid input. Please enter a number between {} and {}.",
                    range.start(),
                    range.end()
                );
            }
        }
    }
}

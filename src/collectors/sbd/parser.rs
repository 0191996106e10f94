use crate::errors::CollectorError;
use std::collections::HashMap;
use tracing::warn;

/// Key/value pairs of the sbd sysconfig file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SbdConfig {
    values: HashMap<String, String>,
}

impl SbdConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Devices from `SBD_DEVICE`; empty for diskless sbd.
    pub fn devices(&self) -> Vec<String> {
        self.get("SBD_DEVICE")
            .map(|raw| {
                raw.split(';')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn watchdog_armed(&self) -> bool {
        let device = self.get("SBD_WATCHDOG_DEV").map(str::trim).unwrap_or("");
        let disabled = self.get("SBD_WATCHDOG").map(|v| !is_yes(v)).unwrap_or(false);
        !device.is_empty() && !disabled
    }

    pub fn watchdog_timeout(&self) -> Option<f64> {
        let raw = self.get("SBD_WATCHDOG_TIMEOUT")?;
        match raw.trim().parse() {
            Ok(timeout) => Some(timeout),
            Err(_) => {
                warn!(value = raw, "unparseable SBD_WATCHDOG_TIMEOUT");
                None
            }
        }
    }

    /// sbd enables the pacemaker integration when `SBD_PACEMAKER` is unset.
    pub fn pacemaker_integration(&self) -> bool {
        self.get("SBD_PACEMAKER").map(is_yes).unwrap_or(true)
    }
}

fn is_yes(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "y" | "true" | "1" | "on"
    )
}

/// Parse `KEY=value` lines, ignoring comments and stripping optional quotes.
pub fn parse_config(text: &str) -> SbdConfig {
    let mut values = HashMap::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            warn!(line = number + 1, "skipping sbd config line without '='");
            continue;
        };
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        values.insert(key.trim().to_string(), value.to_string());
    }
    SbdConfig { values }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeouts {
    pub watchdog: f64,
    pub msgwait: f64,
}

/// Timeouts from the `sbd -d <device> dump` header.
pub fn parse_dump(text: &str) -> Result<Timeouts, CollectorError> {
    let mut watchdog = None;
    let mut msgwait = None;
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let slot = match key.trim() {
            "Timeout (watchdog)" => &mut watchdog,
            "Timeout (msgwait)" => &mut msgwait,
            _ => continue,
        };
        *slot = Some(
            value
                .trim()
                .parse::<f64>()
                .map_err(|e| CollectorError::parse("sbd dump", format!("{}: {}", key.trim(), e)))?,
        );
    }
    match (watchdog, msgwait) {
        (Some(watchdog), Some(msgwait)) => Ok(Timeouts { watchdog, msgwait }),
        _ => Err(CollectorError::parse("sbd dump", "missing watchdog or msgwait timeout")),
    }
}

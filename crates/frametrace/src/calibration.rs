//! NTP delay readings used to refine the clock alignment.

use regex::Regex;
use std::{fs, path::Path, sync::LazyLock};
use tracing::{info, warn};

/// Matches a peer line of `ntpq -p`. The delay is the third column from
/// the end, followed by offset and jitter.
static PEER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.*(?P<delay>\s+-?[0-9]+\.[0-9]+)(\s+-?[0-9]+\.[0-9]+){2}$")
        .expect("ntpq peer pattern is valid")
});

/// Find the delay (milliseconds) of the first peer listed in `ntpq -p`
/// output.
pub fn parse_ntp_delay(text: &str) -> Option<f64> {
    text.lines().find_map(|line| {
        let caps = PEER_LINE.captures(line.trim_end())?;
        caps["delay"].trim().parse().ok()
    })
}

/// Read the NTP delay from a file holding `ntpq -p` output. Every
/// failure falls back to a delay of zero.
pub fn read_ntp_delay(path: &Path) -> f64 {
    let text = match fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Cannot read NTP info, assuming zero delay");
            return 0.0;
        }
    };

    match parse_ntp_delay(&text) {
        Some(delay) => {
            info!(path = %path.display(), delay_ms = delay, "Read NTP delay");
            delay
        }
        None => {
            warn!(path = %path.display(), "No NTP delay found, assuming zero delay");
            0.0
        }
    }
}

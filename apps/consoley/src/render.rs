use std::time::{SystemTime, UNIX_EPOCH};

use session_readiness::{SessionStatus, StatusSnapshot};

use crate::config::DisplayConfig;

/// One line per observable state: loading indicator, ready, or error.
pub fn status_line(snapshot: &StatusSnapshot) -> String {
    if snapshot.provisioning {
        return "provisioning worker...".to_string();
    }
    match snapshot.status {
        SessionStatus::Stopped => "stopped".to_string(),
        SessionStatus::Starting => match snapshot.progress() {
            Some(progress) => format!("waiting for display service ({progress})"),
            None => "waiting for display service".to_string(),
        },
        SessionStatus::Running => match snapshot.reachable {
            Some(false) => "running (display not answering)".to_string(),
            _ => "running".to_string(),
        },
        SessionStatus::Error => match &snapshot.failure {
            Some(reason) => format!("error: {reason}"),
            None => "error".to_string(),
        },
    }
}

/// Embed URL for the web viewer. `t` busts caches between attempts.
pub fn display_url(display: &DisplayConfig, millis: u128) -> String {
    format!(
        "http://{}:{}/vnc.html?autoconnect=true&resize=scale&password=&view_only={}&t={millis}",
        display.host, display.port, display.view_only
    )
}

pub fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

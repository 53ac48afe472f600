//! Output formatting utilities for the CLI
//!
//! Tables for the interface registry, the daemon status block, and coloured
//! status lines for operation results.

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use pp_core::report::{OperationReport, Outcome, RebindOutcome, RefreshSummary};
use pp_core::types::InterfaceSnapshot;

use crate::ipc::OrchestratorStatus;

/// Format the registry as an ASCII table
///
/// The detailed view adds the bind address, proxy credentials and the
/// tunnel URL.
pub fn format_interfaces(interfaces: &[InterfaceSnapshot], detailed: bool) -> String {
    if interfaces.is_empty() {
        return "No modems found".to_string();
    }

    #[derive(Tabled)]
    struct InterfaceRow {
        #[tabled(rename = "INTERFACE")]
        interface: String,
        #[tabled(rename = "MODEM")]
        modem: String,
        #[tabled(rename = "IP")]
        ip: String,
        #[tabled(rename = "PROXY")]
        proxy: String,
        #[tabled(rename = "PORT")]
        port: String,
        #[tabled(rename = "TUNNEL")]
        tunnel: String,
    }

    #[derive(Tabled)]
    struct InterfaceRowDetailed {
        #[tabled(rename = "INTERFACE")]
        interface: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "MODEM")]
        modem: String,
        #[tabled(rename = "IP")]
        ip: String,
        #[tabled(rename = "PROXY")]
        proxy: String,
        #[tabled(rename = "PORT")]
        port: String,
        #[tabled(rename = "BIND IP")]
        bind_ip: String,
        #[tabled(rename = "CREDENTIALS")]
        credentials: String,
        #[tabled(rename = "TUNNEL")]
        tunnel: String,
        #[tabled(rename = "URL")]
        url: String,
    }

    let port = |e: &InterfaceSnapshot| {
        e.proxy
            .port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    let tunnel = |e: &InterfaceSnapshot| {
        e.tunnel
            .as_ref()
            .map(|t| t.status.to_string())
            .unwrap_or_else(|| "-".to_string())
    };

    if detailed {
        let rows: Vec<InterfaceRowDetailed> = interfaces
            .iter()
            .map(|e| InterfaceRowDetailed {
                interface: e.interface_name().to_string(),
                name: e.modem.display_name.clone(),
                modem: e.modem.connectivity.to_string(),
                ip: or_dash(e.modem.ip_address.as_deref()),
                proxy: e.proxy.proxy_status.to_string(),
                port: port(e),
                bind_ip: or_dash(e.proxy.bind_ip.as_deref()),
                credentials: e
                    .proxy
                    .credentials
                    .as_ref()
                    .map(|c| format!("{}:{}", c.username, c.password))
                    .unwrap_or_else(|| "-".to_string()),
                tunnel: tunnel(e),
                url: or_dash(e.tunnel.as_ref().and_then(|t| t.public_url.as_deref())),
            })
            .collect();

        Table::new(rows)
            .with(Style::rounded())
            .with(Width::wrap(180))
            .to_string()
    } else {
        let rows: Vec<InterfaceRow> = interfaces
            .iter()
            .map(|e| InterfaceRow {
                interface: e.interface_name().to_string(),
                modem: e.modem.connectivity.to_string(),
                ip: or_dash(e.modem.ip_address.as_deref()),
                proxy: e.proxy.proxy_status.to_string(),
                port: port(e),
                tunnel: tunnel(e),
            })
            .collect();

        Table::new(rows).with(Style::rounded()).to_string()
    }
}

/// Format orchestrator status as a human-readable string
pub fn format_status(status: &OrchestratorStatus) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "Orchestrator Status: {}\n",
        if status.running { "Running" } else { "Stopped" }
    ));
    output.push_str(&format!("Version: {}\n", status.version));
    output.push_str(&format!(
        "Uptime: {}\n",
        format_duration(status.uptime_secs)
    ));
    output.push_str(&format!(
        "Backend: {} (tunnels via {})\n",
        status.backend, status.tunnel_provider
    ));
    output.push_str(&format!("Modems: {}\n", status.interface_count));
    output.push_str(&format!("Running Proxies: {}\n", status.running_proxies));
    output.push_str(&format!("Active Tunnels: {}\n", status.active_tunnels));

    output
}

/// One-line summary of a refresh
pub fn format_refresh(summary: &RefreshSummary) -> String {
    let mut line = format!("Refreshed {} interfaces", summary.reconciled);
    if summary.skipped_busy > 0 {
        line.push_str(&format!(", {} busy", summary.skipped_busy));
    }
    if summary.unreachable > 0 {
        line.push_str(&format!(", {} unreachable", summary.unreachable));
    }
    if summary.removed > 0 {
        line.push_str(&format!(", {} removed", summary.removed));
    }
    line
}

/// Print an operation report in the colour matching its outcome
pub fn print_report(report: &OperationReport) {
    match report.outcome {
        Outcome::Success => print_success(&report.message),
        Outcome::Partial { .. } => print_warning(&report.message),
        Outcome::Failed => print_error(&report.message),
    }
}

/// Print a rebind outcome
pub fn print_rebind(outcome: &RebindOutcome) {
    if outcome.success {
        print_success(&outcome.message);
    } else {
        print_error(&outcome.message);
    }
}

/// Format duration in human-readable form
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let remaining_secs = secs % 60;
        format!("{}m {}s", mins, remaining_secs)
    } else if secs < 86400 {
        let hours = secs / 3600;
        let remaining_mins = (secs % 3600) / 60;
        format!("{}h {}m", hours, remaining_mins)
    } else {
        let days = secs / 86400;
        let remaining_hours = (secs % 86400) / 3600;
        format!("{}d {}h", days, remaining_hours)
    }
}

fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow
///
/// Outputs to stderr.
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

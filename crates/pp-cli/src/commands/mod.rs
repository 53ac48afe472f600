//! CLI command implementations

mod config;
mod list;
mod modem;
mod proxy;
mod status;
mod tunnel;

pub use config::{config_get, config_init, config_set, config_show};
pub use list::{list_command, refresh_command};
pub use modem::{rebind_command, rotate_command};
pub use proxy::{proxy_command, proxy_set_command};
pub use status::status_command;
pub use tunnel::tunnel_command;

use anyhow::Result;
use pp_core::report::{OperationReport, Outcome};

use crate::output::print_report;

/// Print a report and turn a total failure into an error exit
fn finish_report(report: OperationReport) -> Result<()> {
    print_report(&report);
    match report.outcome {
        Outcome::Failed => anyhow::bail!("{} failed", report.operation),
        Outcome::Success | Outcome::Partial { .. } => Ok(()),
    }
}

use std::io::IsTerminal;

use chanprims_handle::Handle;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// State of one channel end at the time the command finished.
#[derive(Debug, Serialize)]
pub struct EndReport {
    pub role: &'static str,
    pub state: String,
    pub token: Option<String>,
    pub peer_pid: Option<u32>,
}

impl EndReport {
    pub fn of(role: &'static str, handle: &Handle) -> Self {
        Self {
            role,
            state: handle.state().to_string(),
            token: handle.connection_token().ok().map(|token| token.to_string()),
            peer_pid: handle
                .peer_credentials()
                .ok()
                .flatten()
                .map(|(_, _, pid)| pid),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PingReport {
    pub bytes: usize,
    pub delivered: bool,
}

#[derive(Debug, Serialize)]
pub struct ChannelReport {
    pub schema_id: &'static str,
    pub command: &'static str,
    pub name: String,
    pub kind: &'static str,
    pub token: String,
    pub ends: Vec<EndReport>,
    pub ping: PingReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_fired: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_preserved: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parcel_bytes: Option<usize>,
}

pub fn print_report(report: &ChannelReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["END", "STATE", "TOKEN", "PEER PID"]);
            for end in &report.ends {
                table.add_row(vec![
                    end.role.to_string(),
                    end.state.clone(),
                    end.token.clone().unwrap_or_else(|| "-".to_string()),
                    end.peer_pid
                        .map(|pid| pid.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ]);
            }
            println!(
                "{} {:?} ({}) token={}",
                report.command, report.name, report.kind, report.token
            );
            println!("{table}");
            println!("ping: {}", ping_text(&report.ping));
        }
        OutputFormat::Pretty => {
            println!(
                "{} name={:?} kind={} token={} ping={}",
                report.command,
                report.name,
                report.kind,
                report.token,
                ping_text(&report.ping)
            );
            for end in &report.ends {
                println!(
                    "  {:<10} {:<9} {}",
                    end.role,
                    end.state,
                    end.token.as_deref().unwrap_or("-")
                );
            }
            if let Some(fired) = report.hook_fired {
                println!("  hook fired {fired} time(s)");
            }
            if let Some(bytes) = report.parcel_bytes {
                println!("  parcel carried {bytes} data bytes");
            }
        }
        OutputFormat::Raw => {
            println!("{}", report.token);
        }
    }
}

fn ping_text(ping: &PingReport) -> String {
    if ping.delivered {
        format!("delivered ({} bytes)", ping.bytes)
    } else {
        "not delivered".to_string()
    }
}

use std::os::fd::AsFd;

use chanprims_handle::open_pair;
use chanprims_parcel::Parcel;
use chanprims_transport::{IpcStream, ParcelTransport, SocketKind};
use serde::Serialize;

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Info,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    schema_id: &'static str,
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(_args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let checks = vec![
        socket_kind_check(),
        pair_creation_check(),
        descriptor_passing_check(),
        compiled_features_check(),
    ];

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let output = DoctorOutput {
        schema_id: "https://schemas.chanprims.dev/cli/v1/doctor-report.schema.json",
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };

    print_doctor(&output, format);

    Ok(if has_fail { HEALTH_CHECK_FAILED } else { SUCCESS })
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("chanprims doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<20} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Info => "INFO",
    }
}

fn socket_kind_check() -> CheckResult {
    let kind = SocketKind::platform_default();
    match IpcStream::pair_of(kind) {
        Ok(_) => CheckResult::new(
            "socket_kind",
            CheckStatus::Pass,
            format!("{} socket pairs available", kind.as_str()),
        ),
        Err(err) => CheckResult::new(
            "socket_kind",
            CheckStatus::Fail,
            format!("{} socketpair failed: {err}", kind.as_str()),
        ),
    }
}

fn pair_creation_check() -> CheckResult {
    match open_pair("doctor") {
        Ok((a, b)) => {
            let same_token = matches!(
                (a.connection_token(), b.connection_token()),
                (Ok(x), Ok(y)) if x == y
            );
            if same_token {
                CheckResult::new("pair_creation", CheckStatus::Pass, "channel pair opened")
            } else {
                CheckResult::new(
                    "pair_creation",
                    CheckStatus::Fail,
                    "pair ends report different connection tokens",
                )
            }
        }
        Err(err) => CheckResult::new(
            "pair_creation",
            CheckStatus::Fail,
            format!("could not open channel pair: {err}"),
        ),
    }
}

fn descriptor_passing_check() -> CheckResult {
    let result = (|| -> Result<usize, String> {
        let (tx, rx) = IpcStream::pair_of(SocketKind::Stream).map_err(|e| e.to_string())?;
        let (ping, _keep) = IpcStream::pair().map_err(|e| e.to_string())?;

        let mut parcel = Parcel::new();
        parcel.write_u32(1);
        parcel.write_fd(ping.as_fd()).map_err(|e| e.to_string())?;

        ParcelTransport::new(tx)
            .send(&parcel)
            .map_err(|e| e.to_string())?;
        let received = ParcelTransport::new(rx).recv().map_err(|e| e.to_string())?;
        Ok(received.fd_count())
    })();

    match result {
        Ok(1) => CheckResult::new(
            "descriptor_passing",
            CheckStatus::Pass,
            "SCM_RIGHTS transfer succeeded",
        ),
        Ok(count) => CheckResult::new(
            "descriptor_passing",
            CheckStatus::Fail,
            format!("expected 1 descriptor, received {count}"),
        ),
        Err(err) => CheckResult::new(
            "descriptor_passing",
            CheckStatus::Fail,
            format!("SCM_RIGHTS transfer failed: {err}"),
        ),
    }
}

fn compiled_features_check() -> CheckResult {
    let mut features = Vec::new();
    if cfg!(feature = "cli") {
        features.push("cli");
    }

    CheckResult::new("compiled_features", CheckStatus::Info, features.join(", "))
}

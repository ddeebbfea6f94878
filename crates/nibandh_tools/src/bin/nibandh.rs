#![forbid(unsafe_code)]

use std::env;

use nibandh_contracts::conflict::{ConflictKey, PageRangeClaim};
use nibandh_contracts::record::{
    BookNo, CapturedRecord, DeedNo, DistrictCode, OperatorId, PageRange, RequestTag, SroCode,
    VolumeNo, VolumeYear,
};
use nibandh_contracts::UtcTimeMs;
use nibandh_engines::gateway::{GatewayHttpConfig, RegistryGateway};
use nibandh_os::{
    CaptureRuntime, ConflictChecker, ConflictSource, SchedulerConfig, SyncManager, SyncScheduler,
};
use nibandh_store::RecordStore;
use nibandh_tools::sync_cli::{execute_health_command, execute_sync_command};

const USAGE: &str = "usage: nibandh <capture|check|health|schedule> ...\n  \
    capture <district> <sro> <volume_year> <volume_no> <book_no> <start_page> <end_page> [deed_no]\n  \
    check   <district> <sro> <volume_year> <volume_no> <book_no> <start_page> <end_page>\n  \
    health\n  \
    schedule next";

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let command = args.first().map(String::as_str).ok_or(USAGE)?;
    let now = UtcTimeMs::now();

    match command {
        "health" => {
            println!("{}", execute_health_command(&gateway_from_env()?, now));
            Ok(())
        }
        "schedule" => {
            if args.get(1).map(String::as_str) != Some("next") {
                return Err(USAGE.to_string());
            }
            let scheduler = SyncScheduler::new(SchedulerConfig::from_env(), now);
            for (trigger, fire_at) in scheduler.upcoming() {
                let wait_s = fire_at.0.saturating_sub(now.0) / 1_000;
                println!("{}: in {}s", trigger.as_str(), wait_s);
            }
            Ok(())
        }
        "check" => {
            let claim = claim_from_args(&args[1..], now)?;
            let mut store = RecordStore::new_in_memory();
            let outcome = ConflictChecker::new(gateway_from_env()?).check(&mut store, &claim, now);
            print_check_outcome(&outcome);
            Ok(())
        }
        "capture" => {
            let record = record_from_args(&args[1..], now)?;
            let claim = PageRangeClaim::of_capture(&record, now);
            let gateway = gateway_from_env()?;
            let mut store = RecordStore::new_in_memory();

            // Checks up front rather than waiting for an origin rejection;
            // one extra query per capture is acceptable at CLI volume.
            let outcome = ConflictChecker::new(gateway.clone()).check(&mut store, &claim, now);
            if outcome.conflict {
                print_check_outcome(&outcome);
                return Err("capture refused: page range already claimed".to_string());
            }
            if let Some(err) = &outcome.error {
                println!("warning: {err}");
            }

            let captured = CaptureRuntime::new(gateway.clone()).capture(&mut store, record, now);
            if let Some(err) = captured.error {
                return Err(format!("capture failed: {err}"));
            }
            if let Some(err) = captured.cleanup_error {
                println!("warning: staging cleanup failed: {err}");
            }
            println!(
                "captured as session {} ({})",
                captured
                    .session_id
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default(),
                captured.request_tag.map(RequestTag::as_str).unwrap_or("-")
            );

            let manager = SyncManager::new(gateway);
            let report = execute_sync_command(&manager, &mut store, "retry", UtcTimeMs::now())?;
            println!("{report}");
            Ok(())
        }
        _ => Err(USAGE.to_string()),
    }
}

fn gateway_from_env() -> Result<RegistryGateway, String> {
    Ok(RegistryGateway::Http(
        GatewayHttpConfig::from_env().map_err(|e| e.to_string())?,
    ))
}

fn claim_from_args(args: &[String], now: UtcTimeMs) -> Result<PageRangeClaim, String> {
    if args.len() != 7 {
        return Err(USAGE.to_string());
    }
    let key = ConflictKey {
        district: DistrictCode::new(args[0].as_str()).map_err(|e| e.to_string())?,
        sro: SroCode::new(args[1].as_str()).map_err(|e| e.to_string())?,
        volume_year: VolumeYear::new(args[2].as_str()).map_err(|e| e.to_string())?,
        volume_no: VolumeNo::new(args[3].as_str()).map_err(|e| e.to_string())?,
        book_no: BookNo::new(args[4].as_str()).map_err(|e| e.to_string())?,
    };
    Ok(PageRangeClaim::new(
        key,
        args[5].as_str(),
        args[6].as_str(),
        operator_from_env()?,
        now,
    ))
}

fn operator_from_env() -> Result<OperatorId, String> {
    let operator = env::var("NIBANDH_OPERATOR_ID")
        .map_err(|_| "NIBANDH_OPERATOR_ID is not configured".to_string())?;
    OperatorId::new(operator).map_err(|e| e.to_string())
}

fn record_from_args(args: &[String], now: UtcTimeMs) -> Result<CapturedRecord, String> {
    if !(args.len() == 7 || args.len() == 8) {
        return Err(USAGE.to_string());
    }
    let operator = operator_from_env()?;
    let deed_no = match args.get(7) {
        Some(raw) => Some(DeedNo::new(raw.as_str()).map_err(|e| e.to_string())?),
        None => None,
    };
    CapturedRecord::v1(
        DistrictCode::new(args[0].as_str()).map_err(|e| e.to_string())?,
        SroCode::new(args[1].as_str()).map_err(|e| e.to_string())?,
        operator,
        VolumeYear::new(args[2].as_str()).map_err(|e| e.to_string())?,
        VolumeNo::new(args[3].as_str()).map_err(|e| e.to_string())?,
        BookNo::new(args[4].as_str()).map_err(|e| e.to_string())?,
        deed_no,
        PageRange::parse(args[5].as_str(), args[6].as_str()).map_err(|e| e.to_string())?,
        now,
        RequestTag::Create,
        "cli://nibandh",
    )
    .map_err(|e| e.to_string())
}

fn print_check_outcome(outcome: &nibandh_os::ConflictOutcome) {
    if outcome.conflict {
        let source = match outcome.source {
            Some(ConflictSource::Local) => "local",
            Some(ConflictSource::Remote) => "remote",
            None => "unknown",
        };
        println!("CONFLICT ({source})");
        if let Some(record) = &outcome.conflicting_record {
            println!(
                "claimed by {} at pages {}-{}",
                record.user_id, record.start_page, record.end_page
            );
        }
    } else if let Some(err) = &outcome.error {
        println!("NO CONFLICT ({err})");
    } else {
        println!("NO CONFLICT");
    }
}

//! 명령줄 모드
//!
//! ## 사용법
//! ```text
//! passiflora check                    # 업데이트 확인
//! passiflora check --json             # JSON 출력
//! passiflora sync                     # 데이터베이스/이미지 동기화
//! passiflora sync --retries 3         # 복구 가능한 전송 오류 시 전체 재시도
//! passiflora status                   # 로컬 데이터 상태
//! passiflora config                   # 설정 표시
//! passiflora config --json            # 설정 JSON 출력
//! passiflora config set <key> <value> # 설정 변경
//! passiflora help                     # 도움말
//! ```
//!
//! ## 종료 코드 (check)
//! - `0`: 업데이트 있음
//! - `1`: 에러
//! - `2`: 업데이트 없음

use passiflora_updater::{
    check, open_coordinator, CheckOutcome, FsLocalStore, LocalStore, RecoveryStrategy, SessionError, SyncEvent,
    SyncSession, UpdateConfig,
};
use tokio::sync::broadcast;

use crate::config::{config_file_path, load_config, set_config_value};

/// 명령 실행 후 프로세스 종료 코드 반환
pub async fn run(args: Vec<String>) -> anyhow::Result<i32> {
    let args_ref: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

    if args_ref.is_empty() || matches!(args_ref[0], "help" | "--help" | "-h") {
        print_help();
        return Ok(0);
    }

    if matches!(args_ref[0], "--version" | "-V") {
        println!("passiflora {}", env!("CARGO_PKG_VERSION"));
        return Ok(0);
    }

    match args_ref[0] {
        "check" => cmd_check(&args_ref[1..]).await,
        "sync" => cmd_sync(&args_ref[1..]).await,
        "status" => cmd_status(),
        "config" => cmd_config(&args_ref[1..]),
        other => {
            eprintln!("✗ Unknown command: {}", other);
            eprintln!("  Run 'passiflora help' for usage.");
            Ok(1)
        }
    }
}

// ═══════════════════════════════════════════════════════
// 명령어 핸들러
// ═══════════════════════════════════════════════════════

async fn cmd_check(flags: &[&str]) -> anyhow::Result<i32> {
    let json_mode = flags.contains(&"--json");
    let cfg = load_config()?;
    let mut coordinator = open_coordinator(&cfg)?;

    let result = check::check_once(&mut coordinator, &cfg).await;

    if json_mode {
        println!("{}", check::result_to_json(&result));
        return Ok(check::exit_code(&result));
    }

    match result.outcome {
        CheckOutcome::NoUpdate => {
            println!("✓ Up to date (build {}, data revision {}).", result.current_build, result.local_revision)
        }
        CheckOutcome::DataUpdate => {
            println!(
                "📦 New plant data available: revision {} (local {}).",
                result.data_revision.unwrap_or_default(),
                result.local_revision
            );
            println!();
            println!("💡 Run 'passiflora sync' to download it.");
        }
        CheckOutcome::SoftwareUpdate => {
            println!(
                "📦 New software build {} available (current {}).",
                result.software_build.unwrap_or_default(),
                result.current_build
            );
            if let Some(url) = &result.download_url {
                println!("  Download: {}", url);
            }
        }
        CheckOutcome::Withheld => {
            println!("✓ No update for this build (newer data needs a newer program version).")
        }
        CheckOutcome::Disabled => println!("⚠ Update check is disabled (config set enabled true)."),
        CheckOutcome::Error => {
            eprintln!("✗ Check failed: {}", result.error.as_deref().unwrap_or("unknown error"))
        }
    }

    Ok(check::exit_code(&result))
}

async fn cmd_sync(flags: &[&str]) -> anyhow::Result<i32> {
    let retries = match flags.iter().position(|f| *f == "--retries") {
        Some(i) => flags
            .get(i + 1)
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(|| anyhow::anyhow!("--retries expects a number"))?,
        None => 0,
    };
    let cfg = load_config()?;
    let mut coordinator = open_coordinator(&cfg)?;

    let printer = tokio::spawn(print_events(coordinator.subscribe()));

    // Ctrl+C 한 번: 진행 중인 요청 취소, 두 번: 즉시 종료
    let token = coordinator.cancellation_token();
    let signal_token = token.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if signal_token.is_cancelled() {
                eprintln!("✗ Interrupted");
                std::process::exit(130);
            }
            tracing::warn!("[Sync] Ctrl+C received, cancelling");
            eprintln!("⚠ Cancelling... press Ctrl+C again to exit immediately.");
            signal_token.cancel();
        }
    });

    // 재시도는 호출측 정책: 전송 오류가 복구 가능할 때만 파이프라인 전체를 다시 실행
    let mut strategy = RecoveryStrategy::new(retries);
    let result = loop {
        let result = SyncSession::run(&mut coordinator).await;
        if !matches!(result, Err(SessionError::Failed(_))) || token.is_cancelled() {
            break result;
        }
        let Some(context) = coordinator.last_error() else {
            break result;
        };
        if !strategy.should_retry(&context.error) {
            break result;
        }
        let delay = context.error.retry_delay(strategy.current_attempt).max(strategy.next_delay());
        strategy.increment();
        eprintln!(
            "↻ {}: retrying in {}s ({}/{})",
            context.error.user_message(),
            delay.as_secs(),
            strategy.current_attempt,
            strategy.max_retries
        );
        let cancelled = tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = token.cancelled() => true,
        };
        if cancelled {
            break result;
        }
    };
    drop(coordinator);
    let _ = printer.await;

    match result {
        Ok(report) => {
            println!();
            println!("✓ Sync complete");
            println!("─────────────────────────────────────────────");
            match report.data_revision {
                Some(rev) => println!("  Data revision:     {}", rev),
                None => println!("  Data revision:     (unknown)"),
            }
            println!("  Images downloaded: {}", report.images_downloaded);
            println!("  Images removed:    {}", report.obsolete_removed.len());
            if !report.changelog_html.trim().is_empty() {
                println!();
                println!("📋 Changelog");
                println!("{}", report.changelog_html.trim());
            }
            if !report.notices_html.trim().is_empty() {
                println!();
                println!("📢 Notices");
                println!("{}", report.notices_html.trim());
            }
            Ok(0)
        }
        Err(e) => {
            eprintln!("✗ {}", e.user_message());
            tracing::debug!("[Sync] Session error: {}", e);
            Ok(1)
        }
    }
}

/// 구독한 이벤트를 진행 표시로 출력. 코디네이터가 drop되면 종료
async fn print_events(mut rx: broadcast::Receiver<SyncEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => print_event(&event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!("[Sync] Progress printer skipped {} events", n)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::MetadataReady { metadata } => {
            println!("→ Server: build {}, data revision {}", metadata.software_build, metadata.data_revision)
        }
        SyncEvent::DatabaseUpdated { .. } => println!("✓ Database updated"),
        SyncEvent::ManifestReady => println!("✓ Image list downloaded"),
        SyncEvent::TotalSteps { max } => println!("→ Downloading {} image(s)", max),
        SyncEvent::StepCompleted { done, max } => println!("  [{}/{}]", done, max),
        SyncEvent::ImageDownloadStarted { file_name } => println!("  ↓ {}", file_name),
        SyncEvent::AllImagesDownloaded => println!("✓ Images up to date"),
        SyncEvent::DownloadProgress { .. } => {}
        other if other.is_failure() => eprintln!("✗ {:?}", other),
        _ => {}
    }
}

fn cmd_status() -> anyhow::Result<i32> {
    let cfg = load_config()?;
    let store = FsLocalStore::open(cfg.resolve_data_dir(), &cfg.database_file_name)?;
    let images = store.local_file_inventory()?;

    println!("📋 Local Data Status");
    println!("─────────────────────────────────────────────");
    println!("  Data directory:    {}", store.data_dir().display());
    println!("  Program build:     {}", cfg.software_build);
    println!("  Data revision:     {}", store.persisted_revision());
    println!("  Last sync aborted: {}", store.last_sync_aborted());
    println!("  Database present:  {}", store.current_path().exists());
    println!("  Backup present:    {}", store.backup_exists());
    println!("  Local images:      {}", images.len());
    println!("  Last change:       {}", store.state().updated_at.as_deref().unwrap_or("never"));

    Ok(0)
}

fn cmd_config(args: &[&str]) -> anyhow::Result<i32> {
    match args.first().copied() {
        Some("set") if args.len() >= 3 => {
            let key = args[1];
            let value = args[2..].join(" ");
            set_config_value(key, &value)?;
            println!("✓ {} = {}", key, value);
        }
        Some("set") => {
            eprintln!("Usage: passiflora config set <key> <value>");
            eprintln!("Keys: enabled, software_build, update_url, database_url, image_meta_url,");
            eprintln!("      image_base_url, changelog_url, notice_url, download_url, data_dir,");
            eprintln!("      database_file_name, request_timeout_secs");
            return Ok(1);
        }
        Some("--json") => {
            let cfg = load_config()?;
            println!("{}", serde_json::to_string(&cfg).unwrap_or_else(|_| "{}".to_string()));
        }
        _ => print_config(&load_config()?),
    }
    Ok(0)
}

fn print_config(cfg: &UpdateConfig) {
    println!("📋 Updater Configuration");
    println!("─────────────────────────────────────────────");
    println!("  enabled:              {}", cfg.enabled);
    println!("  software_build:       {}", cfg.software_build);
    println!("  update_url:           {}", cfg.update_url);
    println!("  database_url:         {}", cfg.database_url);
    println!("  image_meta_url:       {}", cfg.image_meta_url);
    println!("  image_base_url:       {}", cfg.image_base_url);
    println!("  changelog_url:        {}", cfg.changelog_url);
    println!("  notice_url:           {}", cfg.notice_url);
    println!("  download_url:         {}", cfg.download_url);
    println!("  data_dir:             {}", cfg.data_dir.as_deref().unwrap_or("(auto: next to executable)"));
    println!("  database_file_name:   {}", cfg.database_file_name);
    println!("  request_timeout_secs: {}", cfg.request_timeout_secs);
    println!();
    println!("  Config file: {}", config_file_path().display());
    println!();
    println!("  Change with: passiflora config set <key> <value>");
}

fn print_help() {
    println!("passiflora {}: plant data updater", env!("CARGO_PKG_VERSION"));
    println!();
    println!("USAGE:");
    println!("  passiflora <command> [options]");
    println!();
    println!("COMMANDS:");
    println!("  check [--json]             Check for software/data updates");
    println!("  sync [--retries <n>]       Download database and images");
    println!("  status                     Show local data status");
    println!("  config [--json]            Show configuration");
    println!("  config set <key> <value>   Change a configuration value");
    println!("  help                       Show this help");
    println!();
    println!("EXIT CODES (check):");
    println!("  0  update available");
    println!("  1  error");
    println!("  2  nothing to do");
    println!();
    println!("Set RUST_LOG=debug for verbose logs (written to stderr).");
}

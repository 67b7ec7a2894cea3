//! neurod: wires the synthetic device fabric, the classification pipeline,
//! and the audit ledger into one process.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use neuro_classify::classifiers::{
    MentalStateClassifier, MotorImageryClassifier, SeizurePredictor, SleepStageClassifier,
};
use neuro_classify::features::{
    MentalStateFeatures, MotorImageryFeatures, SeizureFeatures, SleepFeatures,
};
use neuro_classify::{StreamProcessor, StreamProcessorConfig};
use neuro_core::metrics::{MetricsSink, TracingMetrics};
use neuro_core::types::{ClassificationResult, SeizureRisk};
use neuro_device::{
    Device, DeviceManager, DeviceManagerConfig, SignalProfile, SyntheticConfig, SyntheticDevice,
};
use neuro_ledger::event::{EventType, LogFields};
use neuro_ledger::hash_chain;
use neuro_ledger::processor::{EventProcessor, RetryPolicy};
use neuro_ledger::signer::{EventSigner, LocalKeyStore};
use neuro_ledger::storage::{
    ColumnWarehouse, DocumentStore, MemoryDocumentStore, MemoryRowStore, MemoryWarehouse, RowStore,
};
use neuro_ledger::transport::{EventTransport, InProcessTransport};
use neuro_ledger::{Ledger, LEDGER_TOPIC};
use tracing_subscriber::EnvFilter;

use crate::config::NeurodConfig;

#[derive(Parser)]
#[command(name = "neurod", about = "Real-time neural signal processing daemon")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the acquisition and classification loop.
    Run {
        /// Stop after this many seconds instead of waiting for ctrl-c.
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Verify hash-chain integrity over a time range.
    VerifyChain {
        /// Range start, RFC 3339. Defaults to 24 hours ago.
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        /// Range end, RFC 3339. Defaults to now.
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
}

struct LedgerStack {
    ledger: Arc<Ledger>,
    processor: Arc<EventProcessor>,
    _task: tokio::task::JoinHandle<()>,
}

async fn build_ledger(cfg: &NeurodConfig, metrics: Arc<dyn MetricsSink>) -> anyhow::Result<LedgerStack> {
    let row = Arc::new(MemoryRowStore::new());
    let doc = Arc::new(MemoryDocumentStore::new());
    let warehouse = Arc::new(MemoryWarehouse::new());
    let signer = EventSigner::new(Arc::new(LocalKeyStore::new(cfg.ledger.keyring.clone())));
    let transport = Arc::new(InProcessTransport::new(cfg.ledger.queue_depth));

    let subscription = transport.subscribe(LEDGER_TOPIC);
    let processor = EventProcessor::new(
        row as Arc<dyn RowStore>,
        doc as Arc<dyn DocumentStore>,
        Arc::clone(&warehouse) as Arc<dyn ColumnWarehouse>,
        signer.clone(),
        Arc::clone(&metrics),
        RetryPolicy {
            max_retries: cfg.ledger.max_retries,
            base_delay_ms: cfg.ledger.retry_base_delay_ms,
        },
    );
    processor.set_compliance_hook(Arc::new(|event| {
        tracing::info!(
            event_id = %event.event_id,
            event_type = event.event_type.as_str(),
            "compliance check triggered"
        );
    }));
    let task = Arc::clone(&processor).spawn(subscription);

    let ledger = Ledger::init(
        transport as Arc<dyn EventTransport>,
        warehouse as Arc<dyn ColumnWarehouse>,
        signer,
        metrics,
    )
    .await
    .context("initialising ledger")?;

    Ok(LedgerStack {
        ledger: Arc::new(ledger),
        processor,
        _task: task,
    })
}

fn profile_from_name(name: &str) -> anyhow::Result<SignalProfile> {
    Ok(match name {
        "resting_alpha" => SignalProfile::RestingAlpha,
        "deep_sleep" => SignalProfile::DeepSleep,
        "motor_left" => SignalProfile::MotorImageryLeft,
        "spike_train" => SignalProfile::SpikeTrain,
        other => anyhow::bail!("unknown signal profile '{}'", other),
    })
}

async fn run(cfg: NeurodConfig, duration_secs: Option<u64>) -> anyhow::Result<()> {
    let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetrics);
    let stack = build_ledger(&cfg, Arc::clone(&metrics)).await?;
    let ledger = Arc::clone(&stack.ledger);

    // Device fabric.
    let manager = DeviceManager::new(DeviceManagerConfig {
        aggregation_window_ms: cfg.aggregation_window_ms.0,
        ..Default::default()
    });
    let device = SyntheticDevice::new(SyntheticConfig {
        id: cfg.device.id.clone(),
        channels: cfg.device.channels.clone(),
        sampling_rate_hz: cfg.device.sampling_rate_hz,
        packet_interval_ms: cfg.device.packet_interval_ms,
        profile: profile_from_name(&cfg.device.profile)?,
        fail_connect: false,
    });
    manager.register_device(device.clone());

    // Classification pipeline.
    let processor = StreamProcessor::new(
        StreamProcessorConfig {
            buffer_ms: cfg.pipeline.buffer_ms,
            cadence_ms: cfg.pipeline.cadence_ms,
        },
        Arc::clone(&metrics),
    );
    processor.add_classifier(
        "mental_state",
        Box::new(MentalStateFeatures::new()),
        Box::new(MentalStateClassifier::new()),
    );
    processor.add_classifier(
        "motor_imagery",
        Box::new(MotorImageryFeatures::new()),
        Box::new(MotorImageryClassifier::new()),
    );
    processor.add_classifier(
        "seizure",
        Box::new(SeizureFeatures::new()),
        Box::new(SeizurePredictor::new("patient-demo")),
    );
    if cfg.pipeline.buffer_ms >= 30_000.0 {
        processor.add_classifier(
            "sleep",
            Box::new(SleepFeatures::new()),
            Box::new(SleepStageClassifier::new()),
        );
    } else {
        tracing::warn!(
            buffer_ms = cfg.pipeline.buffer_ms,
            "buffer too small for 30 s sleep epochs, sleep staging disabled"
        );
    }

    // Session bring-up, recorded in the ledger.
    let session_id = uuid::Uuid::new_v4().to_string();
    manager.set_session(session_id.clone());
    ledger
        .log_session_created(&session_id, "operator", &cfg.device.id)
        .await?;

    // Persistent device failures surface as device.error events.
    {
        let (error_tx, mut error_rx) = tokio::sync::mpsc::unbounded_channel();
        device.set_error_callback(Arc::new(move |err| {
            let _ = error_tx.send(err);
        }));
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move {
            while let Some(err) = error_rx.recv().await {
                let fields = LogFields::default()
                    .device(&err.device_id)
                    .meta("kind", serde_json::json!(err.kind.to_string()))
                    .meta("message", serde_json::json!(err.message));
                if let Err(log_err) = ledger.log_event(EventType::DeviceError, fields).await {
                    tracing::warn!(%log_err, "failed to record device.error");
                }
            }
        });
    }

    manager.connect_device(&cfg.device.id).await?;
    ledger
        .log_device_connected(&cfg.device.id, "synthetic")
        .await?;

    // Electrode check before streaming, recorded for the session record.
    match device.check_impedance().await {
        Ok(impedances) => {
            let worst = impedances
                .values()
                .map(|r| r.level)
                .max()
                .map(|l| l.as_str().to_string())
                .unwrap_or_else(|| "unknown".into());
            ledger
                .log_event(
                    EventType::DeviceImpedanceCheck,
                    LogFields::default()
                        .session(&session_id)
                        .device(&cfg.device.id)
                        .meta("channel_count", serde_json::json!(impedances.len()))
                        .meta("worst_level", serde_json::json!(worst)),
                )
                .await?;
        }
        Err(err) => tracing::warn!(%err, "impedance check unavailable"),
    }

    // Aggregated batches become data.ingested events with payload hashes,
    // plus an opportunistic signal-quality check per window.
    {
        let ledger = Arc::clone(&ledger);
        let quality_cfg = neuro_dsp::quality::SignalQualityConfig::new(
            cfg.device.sampling_rate_hz,
            cfg.pipeline.line_freq_hz,
        )?;
        manager.start_aggregation(Arc::new(move |batch| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move {
                let mut payload = Vec::new();
                for packet in &batch.packets {
                    for row in packet.data() {
                        for value in row {
                            payload.extend_from_slice(&value.to_le_bytes());
                        }
                    }
                }
                let data_hash = hash_chain::compute_data_hash(&payload);
                if let Err(err) = ledger
                    .log_data_ingested(&batch.session_id, &data_hash, payload.len())
                    .await
                {
                    tracing::warn!(%err, "failed to record data.ingested");
                }

                if let Some(packet) = batch.packets.last() {
                    let window = neuro_core::types::Window {
                        channels: packet.channels().to_vec(),
                        sampling_rate_hz: packet.sampling_rate_hz(),
                        data: packet.data().to_vec(),
                        start_timestamp: packet.timestamp(),
                        duration_ms: packet.n_samples() as f64 / packet.sampling_rate_hz()
                            * 1000.0,
                    };
                    let summary = neuro_dsp::quality::analyze_window(&window, &quality_cfg);
                    let fields = LogFields::default()
                        .session(&batch.session_id)
                        .device(packet.device_id())
                        .meta("overall", serde_json::json!(summary.overall.as_str()))
                        .meta("mean_snr_db", serde_json::json!(summary.mean_snr_db))
                        .meta("min_snr_db", serde_json::json!(summary.min_snr_db));
                    if let Err(err) = ledger
                        .log_event(EventType::DataQualityCheck, fields)
                        .await
                    {
                        tracing::warn!(%err, "failed to record data.quality_check");
                    }
                }
            });
        }));
    }

    // Results consumer: every seizure escalation is recorded; routine
    // inferences are sampled.
    let packet_stream = manager.packet_stream();
    let mut results = Box::pin(processor.process_stream(packet_stream));
    let results_ledger = Arc::clone(&ledger);
    let results_session = session_id.clone();
    let results_task = tokio::spawn(async move {
        let mut count: u64 = 0;
        while let Some(result) = results.next().await {
            count += 1;
            let escalated = matches!(
                &result,
                ClassificationResult::Seizure(r)
                    if r.risk_level >= SeizureRisk::High
            );
            if escalated || count % 50 == 0 {
                let fields = LogFields::default()
                    .session(&results_session)
                    .meta("classifier", serde_json::json!(result.kind()))
                    .meta("label", serde_json::json!(result.label()))
                    .meta(
                        "confidence",
                        serde_json::json!(result.common().confidence),
                    )
                    .meta(
                        "inference_latency_ms",
                        serde_json::json!(result.common().latency_ms),
                    );
                if let Err(err) = results_ledger
                    .log_event(EventType::ModelInference, fields)
                    .await
                {
                    tracing::warn!(%err, "failed to record ml.inference");
                }
            }
            tracing::debug!(
                kind = result.kind(),
                label = result.label(),
                confidence = result.common().confidence,
                latency_ms = result.common().latency_ms,
                "classification"
            );
        }
        tracing::info!(total = count, "result stream ended");
    });

    manager.start_streaming(None).await?;
    tracing::info!(session_id = %session_id, "streaming started");

    match duration_secs {
        Some(secs) => {
            tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
        }
        None => {
            tokio::signal::ctrl_c().await?;
            tracing::info!("shutdown requested");
        }
    }

    // Orderly teardown: stop devices, flush aggregation, close the session.
    manager.stop_streaming().await?;
    manager.stop_aggregation();
    manager.disconnect_device(&cfg.device.id).await?;
    ledger
        .log_event(
            EventType::SessionEnded,
            LogFields::default().session(&session_id).user("operator"),
        )
        .await?;
    manager.clear_session();

    // Let the processor drain before reporting.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    results_task.abort();

    let counters = stack.processor.counters();
    tracing::info!(
        processed = counters.processed,
        tier_failures = counters.tier_failures,
        "ledger processor summary"
    );
    Ok(())
}

async fn verify_chain(
    cfg: NeurodConfig,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> anyhow::Result<()> {
    let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetrics);
    let stack = build_ledger(&cfg, metrics).await?;

    let start = from.unwrap_or_else(|| Utc::now() - chrono::Duration::days(1));
    let end = to.unwrap_or_else(Utc::now);
    let verification = stack.ledger.verify_chain_integrity(start, end).await?;

    if verification.valid {
        println!("chain valid over {} .. {}", start, end);
        Ok(())
    } else {
        println!(
            "chain INVALID, first break at index {:?}",
            verification.first_break
        );
        std::process::exit(1);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = NeurodConfig::load(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.log_filter.0.clone())),
        )
        .init();

    match cli.command {
        Command::Run { duration_secs } => run(cfg, duration_secs).await,
        Command::VerifyChain { from, to } => verify_chain(cfg, from, to).await,
    }
}

mod config;
mod synthetic;

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use emu::io::ContractViolation;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::synthetic::Deliveries;

#[derive(Debug, Error)]
enum HostError {
    #[error(transparent)]
    Contract(#[from] ContractViolation),

    #[error("{device} received {delivered} cycles, expected {expected}")]
    Unbalanced {
        device: &'static str,
        delivered: u64,
        expected: u64,
    },

    #[error("could not encode save state: {0}")]
    SaveState(#[from] bincode::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let config = Config::parse();
    let _guard = init_tracing(config.log_dir.as_deref());

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "run aborted");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins over the default `info` level. The guard must live as
/// long as logging does, or buffered lines are lost.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if let Some(dir) = log_dir {
        let appender = tracing_appender::rolling::never(dir, "ioclock.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        builder.with_writer(writer).with_ansi(false).init();
        Some(guard)
    } else {
        builder.init();
        None
    }
}

fn run(config: &Config) -> Result<(), HostError> {
    let ledger = synthetic::Ledger::default();
    let mut core = synthetic::machine(&ledger);
    tracing::info!(quanta = config.quanta, cycles = config.cycles, "starting");

    for _ in 0..config.quanta {
        core.run_quantum(config.cycles)?;
    }

    let carried = core.io().budget().carried();
    let requested = u64::from(config.quanta) * u64::from(config.cycles);
    let expected = requested.saturating_add_signed(-i64::from(carried));
    let deliveries = ledger.deliveries();
    verify(&deliveries, expected)?;

    tracing::info!(
        cycles = expected,
        carried,
        frames = deliveries.frames,
        irqs = deliveries.irqs,
        dma_steps = deliveries.dma_steps,
        audio_jits = deliveries.audio_jits,
        timer_overflows = deliveries.timer_overflows,
        instructions = deliveries.instructions,
        "every cycle delivered exactly once"
    );

    if let Some(path) = &config.save_state {
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, &core.io().snapshot())?;
        tracing::info!(path = %path.display(), "scheduler state saved");
    }
    Ok(())
}

/// Audio hears every cycle; the other devices every cycle but the silence.
fn verify(deliveries: &Deliveries, expected: u64) -> Result<(), HostError> {
    let checks = [
        ("audio", deliveries.audio),
        ("graphics", deliveries.graphics + deliveries.silence),
        ("timers", deliveries.timers + deliveries.silence),
        ("serial", deliveries.serial + deliveries.silence),
    ];
    for (device, delivered) in checks {
        if delivered != expected {
            return Err(HostError::Unbalanced {
                device,
                delivered,
                expected,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use emu::io::IoState;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::synthetic::CYCLES_PER_FRAME;

    fn config(quanta: u32, cycles: u32) -> Config {
        Config {
            quanta,
            cycles,
            log_dir: None,
            save_state: None,
        }
    }

    #[test]
    fn frame_sized_quanta_balance() {
        run(&config(3, CYCLES_PER_FRAME)).unwrap();
    }

    #[test]
    fn odd_sized_quanta_balance() {
        run(&config(700, 997)).unwrap();
    }

    #[test]
    fn unbalanced_delivery_is_reported() {
        let deliveries = Deliveries {
            graphics: 10,
            timers: 10,
            serial: 9,
            audio: 10,
            ..Deliveries::default()
        };
        let error = verify(&deliveries, 10).unwrap_err();
        assert_eq!(
            error.to_string(),
            "serial received 9 cycles, expected 10"
        );
    }

    #[test]
    fn save_state_decodes_back() {
        let ledger = synthetic::Ledger::default();
        let mut core = synthetic::machine(&ledger);
        core.run_quantum(CYCLES_PER_FRAME / 2).unwrap();

        let state = core.io().snapshot();
        let bytes = bincode::serialize(&state).unwrap();
        let decoded: IoState = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, state);
    }
}

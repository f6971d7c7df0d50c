//! Один проверенный прогон умножения матриц на симулируемом ускорителе

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use wide_matmul::accelerator::{DeviceConfig, Fault, SimulatedAccelerator};
use wide_matmul::{MatrixType, RunConfig};

/// Точки отказа симулятора, доступные из командной строки
#[derive(Debug, Clone, Copy, ValueEnum)]
enum InjectFault {
    Allocate,
    Bind,
    Migrate,
    Submit,
    /// Ядро зависает дольше таймаута
    Hang,
}

#[derive(Parser)]
#[command(name = "wide_matmul")]
#[command(version, about = "Tiled matrix multiply on a simulated accelerator, cross-checked in software")]
struct Cli {
    /// JSON файл с параметрами прогона; флаги ниже его переопределяют
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Tile size m (lanes per wide word)
    #[arg(short = 'm', long)]
    tile_size: Option<usize>,

    /// Matrix size N, a multiple of the tile size
    #[arg(short = 'n', long)]
    matrix_size: Option<usize>,

    #[arg(short, long)]
    seed: Option<u64>,

    /// Device wait bound in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[arg(long, value_enum)]
    matrix_type: Option<MatrixType>,

    /// Make the simulated device fail at the given point
    #[arg(long, value_enum)]
    inject_fault: Option<InjectFault>,

    /// Print the report as JSON instead of a table
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn run_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_json_file(path)
                .with_context(|| format!("Не удалось загрузить конфигурацию {}", path.display()))?,
            None => RunConfig::default(),
        };
        if let Some(tile_size) = self.tile_size {
            config.tile_size = tile_size;
        }
        if let Some(matrix_size) = self.matrix_size {
            config.matrix_size = matrix_size;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if let Some(matrix_type) = self.matrix_type {
            config.matrix_type = matrix_type;
        }
        Ok(config)
    }

    fn fault(&self, config: &RunConfig) -> Option<Fault> {
        self.inject_fault.map(|fault| match fault {
            InjectFault::Allocate => Fault::Allocate,
            InjectFault::Bind => Fault::Bind,
            InjectFault::Migrate => Fault::Migrate,
            InjectFault::Submit => Fault::Submit,
            InjectFault::Hang => Fault::Hang(config.timeout() + Duration::from_secs(1)),
        })
    }
}

fn main() -> Result<ExitCode> {
    env_logger::init();
    let cli = Cli::parse();
    let config = cli.run_config()?;
    if let Err(e) = config.validate() {
        println!("\nTEST ERROR: {e}\n");
        return Ok(ExitCode::from(2));
    }

    let mut device = SimulatedAccelerator::new(DeviceConfig {
        word_lanes: config.tile_size,
        timeout: config.timeout(),
        fault: cli.fault(&config),
    })
    .context("Не удалось инициализировать устройство")?;

    let report = wide_matmul::run(&config, &mut device);
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print();
    }

    Ok(ExitCode::from(report.exit_code() as u8))
}

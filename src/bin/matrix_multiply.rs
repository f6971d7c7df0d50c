//! Прогон умножения матриц по нескольким размерам с итоговой таблицей
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use wide_matmul::accelerator::{DeviceConfig, SimulatedAccelerator};
use wide_matmul::harness::{Outcome, Phase};
use wide_matmul::matrix::{cpu_matrix_multiply, initialize_matrices, multiply_tiled};
use wide_matmul::utils::measure_time;
use wide_matmul::{MatrixType, RunConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;

const TILE_SIZE: usize = 16;
const MATRIX_SIZES: [usize; 4] = [16, 32, 64, 128];
const MATRIX_TYPES: [MatrixType; 3] = [MatrixType::Random, MatrixType::Identity, MatrixType::Zeros];

fn phase_ms(report: &wide_matmul::RunReport, phase: Phase) -> f64 {
    report
        .timings
        .iter()
        .find(|t| t.phase == phase)
        .map(|t| t.elapsed_ms)
        .unwrap_or_default()
}

fn main() -> Result<()> {
    env_logger::init();
    println!("Прогон блочного умножения, тайл {}x{}", TILE_SIZE, TILE_SIZE);

    let total = (MATRIX_SIZES.len() * MATRIX_TYPES.len()) as u64;
    let pb = ProgressBar::new(total);
    pb.set_style(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .context("Неверный шаблон прогресс-бара")?
        .progress_chars("#>-"));

    let mut table = Table::new();
    table.add_row(row!["N", "Входы", "Эталон, мс", "Ядро, мс", "Хост, мс", "Итог"]);
    let mut failures = 0;

    for &size in &MATRIX_SIZES {
        for &matrix_type in &MATRIX_TYPES {
            pb.set_message(format!("N={} {:?}", size, matrix_type));
            let config = RunConfig {
                tile_size: TILE_SIZE,
                matrix_size: size,
                matrix_type,
                ..RunConfig::default()
            };
            let mut device = SimulatedAccelerator::new(DeviceConfig {
                word_lanes: config.tile_size,
                timeout: config.timeout(),
                fault: None,
            })?;
            let report = pb.suspend(|| wide_matmul::run(&config, &mut device));

            // Тот же расчёт без устройства, для сравнения накладных расходов сессии
            let (a, b) = initialize_matrices(matrix_type, size, &mut StdRng::seed_from_u64(config.seed));
            let (host, host_duration) = measure_time(|| multiply_tiled(&a, &b, TILE_SIZE));
            let host_ok = host? == cpu_matrix_multiply(&a, &b);

            let status = match (&report.outcome, host_ok) {
                (Outcome::Passed, true) => "PASS".to_string(),
                (Outcome::Passed, false) => "HOST MISMATCH".to_string(),
                (Outcome::Failed { mismatch }, _) => format!("FAIL @{}", mismatch.index),
                (Outcome::Error { phase, .. }, _) => format!("ERROR ({phase:?})"),
            };
            if status != "PASS" {
                failures += 1;
            }
            table.add_row(row![
                size,
                format!("{:?}", matrix_type),
                format!("{:.3}", phase_ms(&report, Phase::RunReference)),
                format!("{:.3}", phase_ms(&report, Phase::AwaitCompletion)),
                format!("{:.3}", host_duration.as_secs_f64() * 1000.0),
                status
            ]);
            pb.inc(1);
        }
    }
    pb.finish_with_message("готово");

    println!("\nИтоговая статистика:");
    table.printstd();

    if failures > 0 {
        anyhow::bail!("{} прогонов не прошли проверку", failures);
    }
    Ok(())
}

//! Прогон с проверкой и замером времени
//!
//! Фазы идут строго по порядку, каждая меряется отдельно:
//! `Init -> AllocateBuffers -> BindArguments -> MapBuffers -> PopulateInputs -> RunReference ->
//! MigrateToDevice -> Submit -> AwaitCompletion -> ReadResults -> Compare -> Report`.
//! `Report` печатает таблицу замеров и сам в неё не входит.
//! Любая ошибка останавливает прогон в текущей фазе и попадает в отчёт, повторов нет.

use std::fmt;

use log::{error, info};
use prettytable::{row, Table};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::accelerator::types::MappedView;
use crate::accelerator::{AcceleratorSession, AccessMode, KernelArg, MapAccess};
use crate::config::RunConfig;
use crate::error::{MatmulError, Result};
use crate::matrix::{compare_results, cpu_matrix_multiply, initialize_matrices, Matrix, Mismatch, KERNEL_NAME};
use crate::utils::EventTimer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    AllocateBuffers,
    BindArguments,
    MapBuffers,
    PopulateInputs,
    RunReference,
    MigrateToDevice,
    Submit,
    AwaitCompletion,
    ReadResults,
    Compare,
    Report,
}

impl Phase {
    pub const ALL: [Phase; 12] = [
        Phase::Init,
        Phase::AllocateBuffers,
        Phase::BindArguments,
        Phase::MapBuffers,
        Phase::PopulateInputs,
        Phase::RunReference,
        Phase::MigrateToDevice,
        Phase::Submit,
        Phase::AwaitCompletion,
        Phase::ReadResults,
        Phase::Compare,
        Phase::Report,
    ];

    /// Фазы, попадающие в таблицу времени
    pub fn timed() -> &'static [Phase] {
        static PHASES: [Phase; 12] = Phase::ALL;
        &PHASES[..PHASES.len() - 1]
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Init => "Accelerator initialization",
            Phase::AllocateBuffers => "Allocate contiguous device buffers",
            Phase::BindArguments => "Set kernel arguments",
            Phase::MapBuffers => "Map buffers to userspace pointers",
            Phase::PopulateInputs => "Populating buffer inputs",
            Phase::RunReference => "Software matrix multiply run",
            Phase::MigrateToDevice => "Memory object migration enqueue",
            Phase::Submit => "Enqueue kernel task",
            Phase::AwaitCompletion => "Wait for kernel to complete",
            Phase::ReadResults => "Read back computation results",
            Phase::Compare => "Compare software and hardware results",
            Phase::Report => "Report",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Итог прогона
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed { mismatch: Mismatch },
    Error { phase: Phase, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseTiming {
    pub phase: Phase,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub config: RunConfig,
    pub timings: Vec<PhaseTiming>,
    pub outcome: Outcome,
}

impl RunReport {
    pub fn verified(&self) -> bool {
        self.outcome == Outcome::Passed
    }

    /// 0 при совпадении, 1 при расхождении, 2 при ошибке
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            Outcome::Passed => 0,
            Outcome::Failed { .. } => 1,
            Outcome::Error { .. } => 2,
        }
    }

    pub fn timing_table(&self) -> Table {
        let mut table = Table::new();
        table.add_row(row!["Phase", "Elapsed (ms)"]);
        for timing in &self.timings {
            table.add_row(row![timing.phase.label(), format!("{:.3}", timing.elapsed_ms)]);
        }
        table
    }

    /// Печатает итог и таблицу времени фаз
    pub fn print(&self) {
        match &self.outcome {
            Outcome::Passed => println!("\nTEST PASSED\n"),
            Outcome::Failed { mismatch } => {
                println!(
                    "ERROR: software and hardware matrix mult do not match: {}!={} at position {}",
                    mismatch.hardware, mismatch.software, mismatch.index
                );
                println!("\nTEST FAILED\n");
            }
            Outcome::Error { phase, message } => {
                println!("\nTEST ERROR: {message} (during \"{phase}\")\n");
            }
        }
        println!("--------------- Key execution times ---------------");
        self.timing_table().printstd();
    }
}

/// Выполняет один прогон на переданной сессии устройства
pub fn run(config: &RunConfig, session: &mut dyn AcceleratorSession) -> RunReport {
    println!("-- Parallelizing the Data Path --\n");
    info!(
        "run: N={}, tile={}, seed={}, inputs={:?}",
        config.matrix_size, config.tile_size, config.seed, config.matrix_type
    );

    let mut timer = EventTimer::new();
    let outcome = match execute(config, session, &mut timer) {
        Ok(None) => Outcome::Passed,
        Ok(Some(mismatch)) => Outcome::Failed { mismatch },
        Err(e) => {
            let phase = timer.current().copied().unwrap_or(Phase::Init);
            error!("run aborted during {phase:?}: {e}");
            Outcome::Error {
                phase,
                message: e.to_string(),
            }
        }
    };

    let timings = timer
        .into_events()
        .into_iter()
        .map(|(phase, elapsed)| PhaseTiming {
            phase,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        })
        .collect();

    RunReport {
        config: config.clone(),
        timings,
        outcome,
    }
}

fn execute(config: &RunConfig, session: &mut dyn AcceleratorSession, timer: &mut EventTimer<Phase>) -> Result<Option<Mismatch>> {
    timer.add(Phase::Init);
    config.validate()?;
    if session.word_lanes() != config.tile_size {
        return Err(MatmulError::config(format!(
            "device word has {} lanes but tile size is {}",
            session.word_lanes(),
            config.tile_size
        )));
    }
    let n = config.matrix_size;
    let bytes = config.buffer_bytes()?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let kernel = session.create_kernel(KERNEL_NAME)?;

    timer.add(Phase::AllocateBuffers);
    let a_buf = session.allocate(bytes, AccessMode::ReadOnly)?;
    let b_buf = session.allocate(bytes, AccessMode::ReadOnly)?;
    let c_buf = session.allocate(bytes, AccessMode::ReadWrite)?;

    timer.add(Phase::BindArguments);
    session.bind_argument(&kernel, 0, KernelArg::Buffer(a_buf))?;
    session.bind_argument(&kernel, 1, KernelArg::Buffer(b_buf))?;
    session.bind_argument(&kernel, 2, KernelArg::Buffer(c_buf))?;
    session.bind_argument(&kernel, 3, KernelArg::Scalar(n as u32))?;

    timer.add(Phase::MapBuffers);
    let mut a_view = session.map(a_buf, MapAccess::Write)?;
    let mut b_view = session.map(b_buf, MapAccess::Write)?;

    timer.add(Phase::PopulateInputs);
    let (a, b) = initialize_matrices(config.matrix_type, n, &mut rng);
    fill_view(&mut a_view, &a.to_row_major())?;
    // ядро читает B по столбцам
    fill_view(&mut b_view, &b.to_column_major())?;
    session.unmap(a_buf, a_view)?;
    session.unmap(b_buf, b_view)?;

    timer.add(Phase::RunReference);
    let expected = cpu_matrix_multiply(&a, &b);

    timer.add(Phase::MigrateToDevice);
    let migration = session.migrate_to_device(&[a_buf, b_buf])?;
    session.await_completion(migration)?;

    timer.add(Phase::Submit);
    let execution = session.submit(&kernel)?;

    timer.add(Phase::AwaitCompletion);
    session.await_completion(execution)?;

    timer.add(Phase::ReadResults);
    let c_view = session.map(c_buf, MapAccess::Read)?;
    let result = Matrix::from_row_major(n, c_view.as_slice().to_vec());
    session.unmap(c_buf, c_view)?;
    let result = result?;
    for buffer in [a_buf, b_buf, c_buf] {
        session.release(buffer)?;
    }

    timer.add(Phase::Compare);
    let mismatch = compare_results(&result, &expected);
    timer.finish();
    Ok(mismatch)
}

fn fill_view(view: &mut MappedView, values: &[u32]) -> Result<()> {
    let buffer = view.buffer();
    let target = view.as_mut_slice();
    if target.len() != values.len() {
        return Err(MatmulError::accelerator(format!(
            "mapped view of buffer {} holds {} values, expected {}",
            buffer,
            target.len(),
            values.len()
        )));
    }
    target.copy_from_slice(values);
    Ok(())
}

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use spmv_core::{
    FaceRenumbering, Halo, Matrix, MatrixStructure, MeshConnectivity, PeriodicHalo, SingleRank,
};
use spmv_tuner::{variant_test, variant_tuned, MeshInput, TunerConfig};

#[derive(Parser)]
#[command(
    name = "spmv-example",
    about = "Checks and tunes sparse matrix-vector product variants on a synthetic grid",
    version,
    long_about = None
)]
struct Cli {
    /// Cells along x
    #[arg(long, default_value = "200")]
    nx: usize,

    /// Cells along y
    #[arg(long, default_value = "200")]
    ny: usize,

    /// Threads for the colored native variant (1 disables the numbering)
    #[arg(long, default_value = "1")]
    threads: usize,

    /// Minimum time of each measurement, in milliseconds
    #[arg(long, default_value = "50")]
    t_measure_ms: u64,

    /// Weight of symmetric operations
    #[arg(long, default_value = "0.5")]
    sym_weight: f64,

    /// Weight of 3x3 block operations
    #[arg(long, default_value = "0.0")]
    block_weight: f64,

    /// Products expected per coefficient assignment
    #[arg(long, default_value = "50")]
    n_min_products: usize,

    /// Skip the variant cross-check
    #[arg(long)]
    no_check: bool,

    /// Largest deviation accepted by the cross-check
    #[arg(long, default_value = "1e-10")]
    tolerance: f64,

    /// Write the tuning report as JSON to this file
    #[arg(long)]
    json: Option<String>,

    /// Also time the accelerated kernels
    #[cfg(feature = "gpu")]
    #[arg(long)]
    gpu: bool,
}

/// Structured grid, periodic along x through one ghost cell per row.
struct Grid {
    n_cells: usize,
    n_cells_ext: usize,
    face_cell: Vec<[usize; 2]>,
    halo: Arc<dyn Halo>,
}

fn build_grid(nx: usize, ny: usize) -> Result<Grid, Box<dyn Error>> {
    if nx < 2 || ny < 1 {
        return Err(format!("grid {}x{} is too small", nx, ny).into());
    }
    let n_cells = nx * ny;
    let id = |i: usize, j: usize| j * nx + i + 1;
    let mut face_cell = Vec::with_capacity(2 * n_cells);
    for j in 0..ny {
        for i in 0..nx - 1 {
            face_cell.push([id(i, j), id(i + 1, j)]);
        }
        face_cell.push([id(nx - 1, j), n_cells + j + 1]);
    }
    for j in 0..ny.saturating_sub(1) {
        for i in 0..nx {
            face_cell.push([id(i, j), id(i, j + 1)]);
        }
    }
    let sources: Vec<usize> = (0..ny).map(|j| j * nx).collect();
    Ok(Grid {
        n_cells,
        n_cells_ext: n_cells + ny,
        face_cell,
        halo: Arc::new(PeriodicHalo::from_cells(n_cells, &sources)?),
    })
}

fn human_size(bytes: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < units.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, units[unit])
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("wgpu", log::LevelFilter::Off)
        .filter_module("naga", log::LevelFilter::Off)
        .init();

    let cli = Cli::parse();

    let mut grid = build_grid(cli.nx, cli.ny)?;
    println!(
        "Grid {}x{}: {} cells, {} ghosts, {} faces",
        cli.nx,
        cli.ny,
        grid.n_cells,
        grid.n_cells_ext - grid.n_cells,
        grid.face_cell.len()
    );

    let numbering = if cli.threads > 1 {
        let renumbering =
            FaceRenumbering::from_face_coloring(grid.n_cells_ext, &grid.face_cell, cli.threads)?;
        grid.face_cell = renumbering.apply(&grid.face_cell, 1);
        println!(
            "Face coloring: {} groups for {} threads",
            renumbering.numbering.n_groups(),
            cli.threads
        );
        Some(renumbering.numbering)
    } else {
        None
    };

    let connectivity = MeshConnectivity::new(grid.n_cells, grid.n_cells_ext, &grid.face_cell);
    let mut mesh = MeshInput::new(connectivity).with_halo(grid.halo.clone());
    if let Some(numbering) = numbering {
        mesh = mesh.with_numbering(numbering);
    }

    #[allow(unused_mut)]
    let mut config = TunerConfig::with_params(
        Duration::from_millis(cli.t_measure_ms),
        cli.sym_weight,
        cli.block_weight,
        cli.n_min_products,
    );
    #[cfg(feature = "gpu")]
    {
        if cli.gpu {
            match spmv_core::GpuAccelerator::new_blocking() {
                Ok(accelerator) => config = config.with_accelerator(accelerator),
                Err(e) => log::warn!("Accelerated variants skipped: {}", e),
            }
        }
    }

    if !cli.no_check {
        let check = variant_test(&mesh, &config, &SingleRank)?;
        println!(
            "Checked {} variant/operation pairs, max deviation {:e}",
            check.entries.len(),
            check.max_diff()
        );
        if let Some(bad) = check.failures(cli.tolerance).next() {
            return Err(format!(
                "variant '{}' deviates by {:e} on {}",
                bad.variant, bad.max_diff, bad.operation
            )
            .into());
        };
    }

    let report = variant_tuned(&mesh, &config, &SingleRank)?;
    println!("Selected {} matrices:", report.selected.kind());
    for choice in &report.choices {
        println!(
            "  {:<32} {:<28} {:12.5e} s",
            choice.operation.name(),
            choice.variant,
            choice.cost
        );
    }

    // Use the selection on a diffusion-like operator
    let da = vec![4.0; grid.n_cells];
    let xa = vec![-1.0; grid.face_cell.len()];
    let structure = Arc::new(MatrixStructure::create(
        report.selected.kind(),
        true,
        &mesh.connectivity,
        mesh.halo.clone(),
        mesh.numbering.clone(),
    )?);
    let mut matrix = Matrix::create_tuned(structure, &report.selected.variant);
    #[cfg(feature = "gpu")]
    {
        if let Some(accelerator) = &config.accelerator {
            matrix.attach_accelerator(accelerator.clone());
        }
    }
    matrix.set_coefficients(true, Default::default(), Some(&da), Some(&xa))?;

    let mut x: Vec<f64> = (0..grid.n_cells_ext).map(|i| (i % cli.nx) as f64).collect();
    let mut y = vec![0.0; grid.n_cells_ext];
    let start_time = std::time::Instant::now();
    matrix.vector_multiply(&mut x, &mut y)?;
    let elapsed_time = start_time.elapsed();
    let norm = y[..grid.n_cells].iter().map(|v| v * v).sum::<f64>().sqrt();
    println!("Elapsed time: {:?}", elapsed_time);
    println!("|A.x| = {:.6e}", norm);

    #[cfg(feature = "gpu")]
    {
        if let Some(accelerator) = &config.accelerator {
            let (to_gpu, from_gpu) = accelerator.transfer_stats();
            log::info!("Bytes transferred To GPU: {}", human_size(to_gpu));
            log::info!("Bytes transferred From GPU: {}", human_size(from_gpu));
        }
    }

    if let Some(path) = &cli.json {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        println!(
            "Report written to {} ({})",
            path,
            human_size(std::fs::metadata(path)?.len())
        );
    }

    Ok(())
}

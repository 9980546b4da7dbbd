//! Compute pipelines run by the accelerated kernels.

use bytemuck::{Pod, Zeroable};

use crate::error::SpmvError;
use crate::gpu::context::GpuContext;

const WORKGROUP_SIZE: u32 = 256;
const MAX_WORKGROUPS: u32 = 65_535;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SpmvParams {
    rows: u32,
    cols: u32,
    nnz: u32,
    _padding: u32,
}

/// CSR product pipeline, compiled once per device.
#[derive(Debug)]
pub(crate) struct SpmvPipeline {
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl SpmvPipeline {
    pub(crate) fn new(context: &GpuContext) -> Self {
        let device = &context.device;
        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("SpMV CSR Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/spmv_csr.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("SpMV CSR Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<SpmvParams>() as u64,
                        ),
                    },
                    count: None,
                },
                storage_entry(1, true), // row_index
                storage_entry(2, true), // col_id
                storage_entry(3, true), // values
                storage_entry(4, true), // x
                storage_entry(5, false), // y
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("SpMV CSR Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("SpMV CSR Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader_module,
            entry_point: Some("main_spmv_csr_per_row"),
            cache: None,
            compilation_options: Default::default(),
        });

        Self {
            bind_group_layout,
            pipeline,
        }
    }
}

fn to_u32(what: &str, values: &[usize]) -> Result<Vec<u32>, SpmvError> {
    values
        .iter()
        .map(|&v| {
            u32::try_from(v).map_err(|_| {
                SpmvError::InvalidDimensions(format!("{} value {} exceeds 32 bits", what, v))
            })
        })
        .collect()
}

/// `y = A.x` for a CSR matrix with `y.len()` rows.
pub(crate) async fn spmv_csr(
    context: &GpuContext,
    pipeline: &SpmvPipeline,
    row_index: &[usize],
    col_id: &[usize],
    values: &[f64],
    x: &[f64],
    y: &mut [f64],
) -> Result<(), SpmvError> {
    let rows = y.len();
    let nnz = col_id.len();
    if row_index.len() != rows + 1 || values.len() < nnz {
        return Err(SpmvError::InvalidDimensions(format!(
            "CSR arrays ({} row bounds, {} values) do not match {} rows and {} entries",
            row_index.len(),
            values.len(),
            rows,
            nnz
        )));
    }
    if rows == 0 {
        return Ok(());
    }
    if nnz == 0 || x.is_empty() {
        y.fill(0.0);
        return Ok(());
    }

    let workgroup_count = (rows as u32).div_ceil(WORKGROUP_SIZE);
    if workgroup_count > MAX_WORKGROUPS {
        return Err(SpmvError::InvalidDimensions(format!(
            "{} rows exceed a single dispatch",
            rows
        )));
    }

    let device = &context.device;
    let params = SpmvParams {
        rows: rows as u32,
        cols: u32::try_from(x.len()).map_err(|_| {
            SpmvError::InvalidDimensions(format!("{} columns exceed 32 bits", x.len()))
        })?,
        nnz: nnz as u32,
        _padding: 0,
    };

    let params_buffer = context.create_gpu_buffer_with_data(
        "SpMV Params",
        bytemuck::bytes_of(&params),
        wgpu::BufferUsages::UNIFORM,
    );
    let row_index_buffer = context.create_gpu_buffer_with_data(
        "SpMV Row Index",
        bytemuck::cast_slice(&to_u32("row index", row_index)?),
        wgpu::BufferUsages::STORAGE,
    );
    let col_id_buffer = context.create_gpu_buffer_with_data(
        "SpMV Column Ids",
        bytemuck::cast_slice(&to_u32("column id", col_id)?),
        wgpu::BufferUsages::STORAGE,
    );
    let values_buffer = context.create_gpu_buffer_with_data(
        "SpMV Values",
        bytemuck::cast_slice(&values[..nnz]),
        wgpu::BufferUsages::STORAGE,
    );
    let x_buffer = context.create_gpu_buffer_with_data(
        "SpMV x",
        bytemuck::cast_slice(x),
        wgpu::BufferUsages::STORAGE,
    );
    let y_buffer = context.create_empty_buffer(
        "SpMV y",
        std::mem::size_of_val(y) as u64,
        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
    );

    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("SpMV CSR Bind Group"),
        layout: &pipeline.bind_group_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: row_index_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: col_id_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: values_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 4,
                resource: x_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 5,
                resource: y_buffer.as_entire_binding(),
            },
        ],
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("SpMV CSR Encoder"),
    });
    {
        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("SpMV CSR Pass"),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(&pipeline.pipeline);
        compute_pass.set_bind_group(0, &bind_group, &[]);
        compute_pass.dispatch_workgroups(workgroup_count, 1, 1);
    }
    context.queue.submit(std::iter::once(encoder.finish()));

    let result: Vec<f64> = context.read_buffer_to_cpu(&y_buffer, rows).await?;
    y.copy_from_slice(&result);
    Ok(())
}

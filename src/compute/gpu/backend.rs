//! GPU backend - Gray-Scott stepping in a wgpu compute shader.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::GpuError;
use crate::compute::{BackendError, ComputeBackend, ConcentrationFields, ReactionParams};

// Embed shader source at compile time
const GRAY_SCOTT_SHADER: &str = include_str!("shaders/gray_scott.wgsl");

/// Workgroup edge length of the step shader.
///
/// Grids are dispatched as whole 16x16 tiles, so this must equal the tile size.
pub const WORKGROUP_SIZE: usize = 16;

/// Uniform buffer struct for the step shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct StepParams {
    width: u32,
    height: u32,
    _pad0: u32,
    _pad1: u32,
    dt: f32,
    dx: f32,
    feed: f32,
    kill: f32,
    du: f32,
    dv: f32,
    _pad2: f32,
    _pad3: f32,
}

/// Fields resident on the GPU.
///
/// Two buffer sets alternate as source and destination. `bind_groups[i]`
/// reads set `i` and writes set `1 - i`.
struct GpuFields {
    width: usize,
    height: usize,
    u: [wgpu::Buffer; 2],
    v: [wgpu::Buffer; 2],
    bind_groups: [wgpu::BindGroup; 2],
    staging_buffer: wgpu::Buffer,
    /// Index of the buffer set holding the latest fields.
    current: usize,
}

impl GpuFields {
    fn field_bytes(&self) -> u64 {
        (self.width * self.height * std::mem::size_of::<f32>()) as u64
    }
}

/// GPU-based backend using WebGPU compute shaders.
pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    resident: Option<GpuFields>,
    /// Set by the device-lost callback.
    lost: Arc<AtomicBool>,
}

impl GpuBackend {
    /// Create a new GPU backend.
    pub async fn new() -> Result<Self, GpuError> {
        // 1. Create wgpu instance
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        // 2. Request adapter
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| GpuError::NoAdapter)?;

        // 3. Request device and queue
        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Gray-Scott GPU"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await?;

        // Errors outside an error scope are logged, not panicked on
        device.on_uncaptured_error(Arc::new(|error| {
            log::error!("Uncaptured GPU error: {}", error);
        }));
        let lost = Arc::new(AtomicBool::new(false));
        let lost_flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            if reason != wgpu::DeviceLostReason::Destroyed {
                log::error!("GPU device lost ({:?}): {}", reason, message);
            }
            lost_flag.store(true, Ordering::SeqCst);
        });

        // 4. Create shader module, layout and pipeline
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Gray-Scott Shader"),
            source: wgpu::ShaderSource::Wgsl(GRAY_SCOTT_SHADER.into()),
        });

        let bind_group_layout = create_step_bind_group_layout(&device);

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Gray-Scott Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            ..Default::default()
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Gray-Scott Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        log::info!("GPU backend ready on {:?}", adapter.get_info().name);

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            resident: None,
            lost,
        })
    }

    /// Create a new GPU backend, blocking on device acquisition.
    pub fn new_blocking() -> Result<Self, GpuError> {
        pollster::block_on(Self::new())
    }

    fn check_device(&self) -> Result<(), BackendError> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(BackendError::Execution("GPU device lost".into()));
        }
        Ok(())
    }

    fn create_field_buffer(&self, label: &str, bytes: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        })
    }

    fn create_bind_group(
        &self,
        params: &wgpu::Buffer,
        (u_in, v_in): (&wgpu::Buffer, &wgpu::Buffer),
        (u_out, v_out): (&wgpu::Buffer, &wgpu::Buffer),
    ) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Step Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: u_in.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: v_in.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: u_out.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: v_out.as_entire_binding(),
                },
            ],
        })
    }

    /// Copy `len` bytes of each source buffer into the staging buffer and map it.
    ///
    /// Blocks until all previously submitted steps and the copy have finished.
    fn read_back(
        &self,
        sources: &[&wgpu::Buffer],
        len: u64,
    ) -> Result<Vec<Vec<f32>>, BackendError> {
        let resident = self.resident.as_ref().ok_or(BackendError::NotLoaded)?;
        self.check_device()?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        for (i, source) in sources.iter().enumerate() {
            let offset = i as u64 * len;
            encoder.copy_buffer_to_buffer(source, 0, &resident.staging_buffer, offset, len);
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        let total = len * sources.len() as u64;
        let buffer_slice = resident.staging_buffer.slice(..total);

        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(GpuError::from)?;
        rx.recv()
            .map_err(|e| BackendError::Execution(e.to_string()))?
            .map_err(GpuError::from)?;

        let fields = {
            let data = buffer_slice.get_mapped_range();
            let result: &[f32] = bytemuck::cast_slice(&data);
            result
                .chunks_exact(len as usize / std::mem::size_of::<f32>())
                .map(|chunk| chunk.to_vec())
                .collect()
        };

        resident.staging_buffer.unmap();
        Ok(fields)
    }
}

impl ComputeBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn load(
        &mut self,
        fields: ConcentrationFields,
        params: ReactionParams,
        tile_size: usize,
    ) -> Result<(), BackendError> {
        if tile_size != WORKGROUP_SIZE {
            return Err(BackendError::UnsupportedTileSize {
                requested: tile_size,
                supported: WORKGROUP_SIZE,
            });
        }

        let bytes = (fields.grid_size() * std::mem::size_of::<f32>()) as u64;
        let limits = self.device.limits();
        let limit = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
        if bytes > limit {
            return Err(GpuError::BufferTooLarge { bytes, limit }.into());
        }
        self.check_device()?;

        // Popped in reverse order below
        let oom_scope = self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let validation_scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let step_params = StepParams {
            width: fields.width as u32,
            height: fields.height as u32,
            _pad0: 0,
            _pad1: 0,
            dt: params.dt,
            dx: params.dx,
            feed: params.feed,
            kill: params.kill,
            du: params.du,
            dv: params.dv,
            _pad2: 0.0,
            _pad3: 0.0,
        };
        let params_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Step Params"),
            size: std::mem::size_of::<StepParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue
            .write_buffer(&params_buffer, 0, bytemuck::bytes_of(&step_params));

        let u = [
            self.create_field_buffer("U Buffer A", bytes),
            self.create_field_buffer("U Buffer B", bytes),
        ];
        let v = [
            self.create_field_buffer("V Buffer A", bytes),
            self.create_field_buffer("V Buffer B", bytes),
        ];
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size: bytes * 2,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // Upload the local fields into set A
        self.queue
            .write_buffer(&u[0], 0, bytemuck::cast_slice(&fields.u));
        self.queue
            .write_buffer(&v[0], 0, bytemuck::cast_slice(&fields.v));

        let bind_groups = [
            self.create_bind_group(&params_buffer, (&u[0], &v[0]), (&u[1], &v[1])),
            self.create_bind_group(&params_buffer, (&u[1], &v[1]), (&u[0], &v[0])),
        ];

        let validation = pollster::block_on(validation_scope.pop());
        let oom = pollster::block_on(oom_scope.pop());
        if let Some(error) = oom.or(validation) {
            for buffer in u.iter().chain(v.iter()) {
                buffer.destroy();
            }
            staging_buffer.destroy();
            params_buffer.destroy();
            return Err(load_failure(error, bytes * 6));
        }

        self.resident = Some(GpuFields {
            width: fields.width,
            height: fields.height,
            u,
            v,
            bind_groups,
            staging_buffer,
            current: 0,
        });
        Ok(())
    }

    fn step(&mut self) -> Result<(), BackendError> {
        let resident = self.resident.as_mut().ok_or(BackendError::NotLoaded)?;
        if self.lost.load(Ordering::SeqCst) {
            return Err(BackendError::Execution("GPU device lost".into()));
        }

        let scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Step Encoder"),
            });

        let workgroups_x = (resident.width / WORKGROUP_SIZE) as u32;
        let workgroups_y = (resident.height / WORKGROUP_SIZE) as u32;

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Gray-Scott Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &resident.bind_groups[resident.current], &[]);
            pass.dispatch_workgroups(workgroups_x, workgroups_y, 1);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(error) = pollster::block_on(scope.pop()) {
            return Err(BackendError::Execution(error.to_string()));
        }
        resident.current = 1 - resident.current;
        Ok(())
    }

    fn read_u(&mut self, out: &mut [f32]) -> Result<(), BackendError> {
        let resident = self.resident.as_ref().ok_or(BackendError::NotLoaded)?;
        let len = resident.field_bytes();
        let source = &resident.u[resident.current];

        let fields = self.read_back(&[source], len)?;
        out.copy_from_slice(&fields[0]);
        Ok(())
    }

    fn snapshot(&mut self) -> Result<ConcentrationFields, BackendError> {
        let resident = self.resident.as_ref().ok_or(BackendError::NotLoaded)?;
        let len = resident.field_bytes();
        let (width, height) = (resident.width, resident.height);
        let sources = [&resident.u[resident.current], &resident.v[resident.current]];

        let mut fields = self.read_back(&sources, len)?.into_iter();
        let u = fields.next().unwrap_or_default();
        let v = fields.next().unwrap_or_default();
        Ok(ConcentrationFields {
            width,
            height,
            u,
            v,
        })
    }

    fn release(&mut self) {
        if let Some(resident) = self.resident.take() {
            for buffer in resident.u.iter().chain(resident.v.iter()) {
                buffer.destroy();
            }
            resident.staging_buffer.destroy();
        }
    }
}

/// Map an error captured while creating the resident buffers.
///
/// `bytes` is the total size requested across all field and staging buffers.
fn load_failure(error: wgpu::Error, bytes: u64) -> BackendError {
    match error {
        wgpu::Error::OutOfMemory { .. } => BackendError::Allocation {
            bytes: usize::try_from(bytes).unwrap_or(usize::MAX),
            reason: error.to_string(),
        },
        other => BackendError::Execution(other.to_string()),
    }
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

fn create_step_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Step Bind Group Layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            storage_entry(1, true),
            storage_entry(2, true),
            storage_entry(3, false),
            storage_entry(4, false),
        ],
    })
}

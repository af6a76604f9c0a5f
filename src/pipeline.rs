//! Stream pipelines driving the stencils over a matrix stack.
//!
//! # Pipelined (host-resident stacks)
//!
//! Three streams and two ping-pong pairs (source tiles, destination tiles):
//!
//! ```text
//!   stream 0: K0 S0 ║ C0      S1 (K1)        C2 ...
//!   stream 1:       ║     C1          S2 (K2)    ...
//!   stream 2:       ║   ──▶D0   ──▶D1   ──▶D2    ...
//!                   ╚ barrier
//! ```
//!
//! `S` stages a source matrix into a source slot, `K` uploads a kernel to a
//! constant bank, `C` computes a source slot into a destination slot, `D`
//! drains a destination slot into the caller's matrix. Stages always run on
//! stream 0; compute `i` runs on stream 0 or 1 after the source slot it
//! reads; drains run on stream 2. Cross-stream order comes from events only:
//!
//! - compute `i` waits for stage `i` and for the drain that last read its
//!   destination slot
//! - stage `i + 1` waits for the compute that last read its source slot
//! - drain `i` waits for compute `i`
//!
//! so stage `i + 1` and drain `i - 1` overlap compute `i`.
//!
//! # Resident (device-resident stacks)
//!
//! One stream and one tile pair: stage, compute and drain run back to back
//! for each matrix, ordered by the stream alone.

use std::sync::{Mutex, MutexGuard};
use std::thread;

use crate::device::{copy_from_tile, copy_to_tile, ConstantCache, DeviceArena, StreamSet};
use crate::dispatch::Kernels;
use crate::element::Element;
use crate::error::{ConvError, ConvResult};
use crate::matrix::Matrix;
use crate::pingpong::BufferPair;
use crate::planner::{BufferPlan, PlanMode};
use crate::stencil::{Specialization, StencilExecutor, StencilLaunch};

/// Streams used by the pipelined driver.
pub const PIPELINE_STREAMS: usize = 3;

const STAGE_STREAM: usize = 0;
const DRAIN_STREAM: usize = 2;

/// What one invocation enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Stencil variant that ran.
    pub specialization: Specialization,
    /// Allocation layout used.
    pub mode: PlanMode,
    /// Streams spawned.
    pub streams: usize,
    /// Matrices processed.
    pub matrices: usize,
    /// Kernel uploads to the constant cache.
    pub kernel_uploads: usize,
    /// Source stagings.
    pub stages: usize,
    /// Stencil launches.
    pub computes: usize,
    /// Destination drains.
    pub drains: usize,
    /// Full barriers the host waited on.
    pub barriers: usize,
    /// Bytes of the invocation's device allocation.
    pub device_bytes: usize,
}

impl PipelineReport {
    fn new(specialization: Specialization, mode: PlanMode, streams: usize, device_bytes: usize) -> Self {
        Self {
            specialization,
            mode,
            streams,
            matrices: 0,
            kernel_uploads: 0,
            stages: 0,
            computes: 0,
            drains: 0,
            barriers: 0,
            device_bytes,
        }
    }
}

/// Per-invocation inputs shared by both drivers.
pub(crate) struct Pass<'a, E> {
    pub constants: &'a ConstantCache,
    pub executor: &'a E,
    pub plan: &'a BufferPlan,
    pub launch: StencilLaunch,
}

fn lock<'m, 'a, T>(tile: &'m Mutex<&'a mut [T]>) -> MutexGuard<'m, &'a mut [T]> {
    tile.lock().unwrap_or_else(|e| e.into_inner())
}

/// Three-stream ping-pong driver.
pub(crate) fn run_pipelined<T, E>(
    pass: &Pass<'_, E>,
    src: &[Matrix<T>],
    kernels: Kernels<'_, T>,
    dst: &mut [Matrix<T>],
    arena: &mut DeviceArena<T>,
) -> ConvResult<PipelineReport>
where
    T: Element,
    E: StencilExecutor<T>,
{
    if src.is_empty() || src.len() != dst.len() {
        return Err(ConvError::dimension_mismatch(&[src.len().max(1)], &[dst.len()]));
    }
    let device_bytes = arena.size_bytes();
    let [src_a, src_b, dst_a, dst_b]: [&mut [T]; 4] = arena
        .split(pass.plan.regions())?
        .try_into()
        .map_err(|_| ConvError::validation("pipelined plan must have four regions"))?;
    let src_tiles = [Mutex::new(src_a), Mutex::new(src_b)];
    let dst_tiles = [Mutex::new(dst_a), Mutex::new(dst_b)];

    let constants = pass.constants;
    let executor = pass.executor;
    let launch = pass.launch;
    let src_pitch = pass.plan.src.alloc_width;
    let dst_pitch = pass.plan.dst.alloc_width;
    let origin = pass.plan.staging_origin;
    let count = src.len();

    let mut report = PipelineReport::new(
        launch.spec,
        PlanMode::Pipelined,
        PIPELINE_STREAMS,
        device_bytes,
    );

    thread::scope(|scope| -> ConvResult<()> {
        let streams = StreamSet::spawn(scope, PIPELINE_STREAMS);
        let stager = streams.get(STAGE_STREAM)?;
        let drainer = streams.get(DRAIN_STREAM)?;

        let mut src_pair = BufferPair::new("source");
        let mut dst_pair = BufferPair::new("destination");
        let mut targets = dst.iter_mut();

        // prologue: kernel and first matrix, then a full barrier
        let first = src_pair.next_slot();
        src_pair.fill(first)?;
        let kernel = kernels.get(0)?;
        stager.enqueue(move || constants.load(first.index(), kernel))?;
        report.kernel_uploads += 1;
        let tile = &src_tiles[first.index()];
        let input = &src[0];
        stager.enqueue(move || copy_to_tile(input, &mut lock(tile)[..], src_pitch, origin))?;
        report.stages += 1;
        src_pair.publish(first)?;
        streams.barrier()?;
        report.barriers += 1;

        let mut staged = None;
        for i in 0..count {
            // compute i on the lane matching its source slot
            let s = src_pair.require_leading()?;
            let lane = streams.get(s.index())?;
            if let Some(event) = staged.take() {
                lane.wait_event(&event)?;
            }
            let d = dst_pair.next_slot();
            if let Some(event) = dst_pair.reclaim(d) {
                lane.wait_event(&event)?;
            }
            dst_pair.fill(d)?;

            let bank = if kernels.is_per_matrix() { s.index() } else { 0 };
            let src_tile = &src_tiles[s.index()];
            let dst_tile = &dst_tiles[d.index()];
            lane.enqueue(move || {
                let input = lock(src_tile);
                let mut output = lock(dst_tile);
                constants.with_coefficients::<T, _>(bank, |coefficients, _| {
                    executor.execute(&launch, coefficients, &input[..], &mut output[..])
                })?
            })?;
            report.computes += 1;
            let computed = lane.record()?;
            src_pair.begin_drain(s, computed.clone())?;
            dst_pair.publish(d)?;
            log::trace!(
                "matrix {}: compute on stream {} ({:?} -> {:?})",
                i,
                lane.id(),
                s,
                d
            );

            if count == 1 {
                streams.barrier()?;
                report.barriers += 1;
            }

            // stage i + 1 into the other source slot
            if i + 1 < count {
                let next = s.other();
                if let Some(event) = src_pair.reclaim(next) {
                    stager.wait_event(&event)?;
                }
                src_pair.fill(next)?;
                let tile = &src_tiles[next.index()];
                let input = &src[i + 1];
                stager.enqueue(move || copy_to_tile(input, &mut lock(tile)[..], src_pitch, origin))?;
                report.stages += 1;
                if kernels.is_per_matrix() {
                    let kernel = kernels.get(i + 1)?;
                    stager.enqueue(move || constants.load(next.index(), kernel))?;
                    report.kernel_uploads += 1;
                }
                src_pair.publish(next)?;
                staged = Some(stager.record()?);
            }

            // drain the slot compute i just published
            let ready = dst_pair.require_leading()?;
            let target = targets
                .next()
                .ok_or_else(|| ConvError::dimension_mismatch(&[count], &[i]))?;
            drainer.wait_event(&computed)?;
            let tile = &dst_tiles[ready.index()];
            drainer.enqueue(move || copy_from_tile(&lock(tile)[..], dst_pitch, target))?;
            report.drains += 1;
            dst_pair.begin_drain(ready, drainer.record()?)?;
            report.matrices += 1;
        }

        streams.barrier()?;
        report.barriers += 1;
        Ok(())
    })?;

    log::debug!(
        "pipelined {} matrices: {} stages, {} computes, {} drains",
        report.matrices,
        report.stages,
        report.computes,
        report.drains
    );
    Ok(report)
}

/// Single-stream driver for device-resident stacks.
pub(crate) fn run_resident<T, E>(
    pass: &Pass<'_, E>,
    src: &[Matrix<T>],
    kernels: Kernels<'_, T>,
    dst: &mut [Matrix<T>],
    arena: &mut DeviceArena<T>,
) -> ConvResult<PipelineReport>
where
    T: Element,
    E: StencilExecutor<T>,
{
    let device_bytes = arena.size_bytes();
    let [src_tile, dst_tile]: [&mut [T]; 2] = arena
        .split(pass.plan.regions())?
        .try_into()
        .map_err(|_| ConvError::validation("resident plan must have two regions"))?;
    let src_tile = Mutex::new(src_tile);
    let dst_tile = Mutex::new(dst_tile);

    let constants = pass.constants;
    let executor = pass.executor;
    let launch = pass.launch;
    let src_pitch = pass.plan.src.alloc_width;
    let dst_pitch = pass.plan.dst.alloc_width;
    let origin = pass.plan.staging_origin;

    let mut report = PipelineReport::new(launch.spec, PlanMode::Resident, 1, device_bytes);

    thread::scope(|scope| -> ConvResult<()> {
        let streams = StreamSet::spawn(scope, 1);
        let stream = streams.get(0)?;
        let (src_tile, dst_tile) = (&src_tile, &dst_tile);

        for (i, (input, target)) in src.iter().zip(dst.iter_mut()).enumerate() {
            if i == 0 || kernels.is_per_matrix() {
                let kernel = kernels.get(i)?;
                stream.enqueue(move || constants.load(0, kernel))?;
                report.kernel_uploads += 1;
            }
            stream.enqueue(move || copy_to_tile(input, &mut lock(src_tile)[..], src_pitch, origin))?;
            stream.enqueue(move || {
                let input = lock(src_tile);
                let mut output = lock(dst_tile);
                constants.with_coefficients::<T, _>(0, |coefficients, _| {
                    executor.execute(&launch, coefficients, &input[..], &mut output[..])
                })?
            })?;
            stream.enqueue(move || copy_from_tile(&lock(dst_tile)[..], dst_pitch, target))?;
            report.stages += 1;
            report.computes += 1;
            report.drains += 1;
            report.matrices += 1;
        }

        streams.barrier()?;
        report.barriers += 1;
        Ok(())
    })?;

    log::debug!("resident pass over {} matrices", report.matrices);
    Ok(report)
}

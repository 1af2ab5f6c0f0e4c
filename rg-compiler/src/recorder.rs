//! Immediate-mode sub-recorder: a compact opcode stream for work that
//! must run during a pass but can be expressed declaratively (clears,
//! copies), plus the per-resource access accumulator that feeds those
//! touched subresources back into the compiler.

use std::collections::BTreeMap;
use std::vec::Vec;

use rg_core::SubresourceRange;

use crate::barrier::AccessFlags;
use crate::resource::ResourceHandle;

/// Opcode tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    CopyBufferRegion = 1,
    ClearRtv = 2,
    ClearDsv = 3,
    ClearUavFloat = 4,
    ClearUavUint = 5,
    CopyTextureRegion = 6,
    CopyTextureToBuffer = 7,
    CopyBufferToTexture = 8,
}

impl Op {
    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Op::CopyBufferRegion,
            2 => Op::ClearRtv,
            3 => Op::ClearDsv,
            4 => Op::ClearUavFloat,
            5 => Op::ClearUavUint,
            6 => Op::CopyTextureRegion,
            7 => Op::CopyTextureToBuffer,
            8 => Op::CopyBufferToTexture,
            _ => return None,
        })
    }
}

/// A decoded opcode plus its payload, as produced by [`OpcodeReader`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedOp {
    CopyBufferRegion {
        dst: ResourceHandle,
        dst_offset: u64,
        src: ResourceHandle,
        src_offset: u64,
        bytes: u64,
    },
    ClearRtv {
        target: ResourceHandle,
        value: [f32; 4],
    },
    ClearDsv {
        target: ResourceHandle,
        depth: f32,
        stencil: u8,
    },
    ClearUavFloat {
        target: ResourceHandle,
        value: [f32; 4],
    },
    ClearUavUint {
        target: ResourceHandle,
        value: [u32; 4],
    },
    CopyTextureRegion {
        dst: ResourceHandle,
        src: ResourceHandle,
    },
    CopyTextureToBuffer {
        dst: ResourceHandle,
        src: ResourceHandle,
    },
    CopyBufferToTexture {
        dst: ResourceHandle,
        src: ResourceHandle,
    },
}

/// Writer side: a byte buffer of tagged, POD-bodied ops.
///
/// This crate doesn't actually need wire-format alignment padding (there is
/// no cross-process/cross-language reader), so the "stream" is a typed `Vec`
/// rather than raw bytes — it is replayed the same way a byte stream would
/// be: `while (!empty) dispatch(read_op())`, with no allocation during
/// replay.
pub struct OpcodeWriter {
    ops: Vec<RecordedOp>,
}

impl OpcodeWriter {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    pub fn copy_buffer_region(
        &mut self,
        dst: ResourceHandle,
        dst_offset: u64,
        src: ResourceHandle,
        src_offset: u64,
        bytes: u64,
    ) -> &mut Self {
        self.ops.push(RecordedOp::CopyBufferRegion {
            dst,
            dst_offset,
            src,
            src_offset,
            bytes,
        });
        self
    }

    pub fn clear_rtv(&mut self, target: ResourceHandle, value: [f32; 4]) -> &mut Self {
        self.ops.push(RecordedOp::ClearRtv { target, value });
        self
    }

    pub fn clear_dsv(&mut self, target: ResourceHandle, depth: f32, stencil: u8) -> &mut Self {
        self.ops.push(RecordedOp::ClearDsv {
            target,
            depth,
            stencil,
        });
        self
    }

    pub fn clear_uav_float(&mut self, target: ResourceHandle, value: [f32; 4]) -> &mut Self {
        self.ops.push(RecordedOp::ClearUavFloat { target, value });
        self
    }

    pub fn clear_uav_uint(&mut self, target: ResourceHandle, value: [u32; 4]) -> &mut Self {
        self.ops.push(RecordedOp::ClearUavUint { target, value });
        self
    }

    pub fn copy_texture_region(&mut self, dst: ResourceHandle, src: ResourceHandle) -> &mut Self {
        self.ops.push(RecordedOp::CopyTextureRegion { dst, src });
        self
    }

    pub fn copy_texture_to_buffer(&mut self, dst: ResourceHandle, src: ResourceHandle) -> &mut Self {
        self.ops.push(RecordedOp::CopyTextureToBuffer { dst, src });
        self
    }

    pub fn copy_buffer_to_texture(&mut self, dst: ResourceHandle, src: ResourceHandle) -> &mut Self {
        self.ops.push(RecordedOp::CopyBufferToTexture { dst, src });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Consume the writer, handing back its ops in recorded order for replay.
    pub fn into_ops(self) -> Vec<RecordedOp> {
        self.ops
    }
}

impl Default for OpcodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Replays a recorded op sequence with a pure `while (!empty) dispatch(...)`
/// loop — no allocation during replay.
pub fn replay(ops: &[RecordedOp], mut dispatch: impl FnMut(&RecordedOp)) {
    for op in ops {
        dispatch(op);
    }
}

/// Strongest access seen so far for a touched subresource, keyed by
/// `(resource, mip, slice)`.
#[derive(Default)]
pub struct AccessAccumulator {
    touched: BTreeMap<(u64, u32, u32), AccessFlags>,
}

impl AccessAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `access` over every `(mip, slice)` cell in `range` for
    /// `resource`, unioning with anything already recorded there.
    pub fn touch(&mut self, resource: u64, range: SubresourceRange, access: AccessFlags) {
        for (mip, slice) in range.enumerate() {
            self.touched
                .entry((resource, mip, slice))
                .and_modify(|a| *a = a.union(access))
                .or_insert(access);
        }
    }

    /// Whether anything has been touched for `resource`.
    pub fn touched_resources(&self) -> impl Iterator<Item = u64> + '_ {
        let mut seen = std::collections::BTreeSet::new();
        self.touched.keys().filter_map(move |&(res, _, _)| {
            if seen.insert(res) {
                Some(res)
            } else {
                None
            }
        })
    }
}

/// Opaque index into the recorder's keep-alive bag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinIndex(u32);

enum Pinned {
    Shared(std::sync::Arc<dyn std::any::Any + Send + Sync>),
    Unique(Box<dyn std::any::Any + Send + Sync>),
}

/// A sub-recorder for operations recorded declaratively during a pass:
/// writes the opcode stream, updates the access accumulator, and owns a
/// keep-alive bag for ephemeral resources used only in this frame's bytecode.
#[derive(Default)]
pub struct ImmediateRecorder {
    writer: OpcodeWriter,
    accumulator: AccessAccumulator,
    pin_bag: Vec<Pinned>,
}

impl ImmediateRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writer(&mut self) -> &mut OpcodeWriter {
        &mut self.writer
    }

    pub fn accumulator(&mut self) -> &mut AccessAccumulator {
        &mut self.accumulator
    }

    /// Pin a uniquely-owned value into the recorder's keep-alive bag; the bag
    /// is dropped only when the frame it belongs to retires.
    pub fn pin_unique<T: std::any::Any + Send + Sync>(&mut self, value: T) -> PinIndex {
        self.pin_bag.push(Pinned::Unique(Box::new(value)));
        PinIndex((self.pin_bag.len() - 1) as u32)
    }

    /// Pin a shared value (reference-counted, may be pinned by more than one
    /// recorder this frame).
    pub fn pin_shared<T: std::any::Any + Send + Sync>(
        &mut self,
        value: std::sync::Arc<T>,
    ) -> PinIndex {
        self.pin_bag.push(Pinned::Shared(value));
        PinIndex((self.pin_bag.len() - 1) as u32)
    }

    /// Finish recording, handing back the op sequence for the compiler to
    /// attach to the owning pass's requirements.
    pub fn finish(self) -> (Vec<RecordedOp>, AccessAccumulator) {
        (self.writer.into_ops(), self.accumulator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_handle(id: u64) -> ResourceHandle {
        ResourceHandle {
            slot_index: 0,
            slot_generation: 1,
            epoch: 0,
            global_id: id,
            num_mips: 1,
            num_slices: 1,
        }
    }

    #[test]
    fn opcode_round_trip_e6() {
        let mut writer = OpcodeWriter::new();
        let target = dummy_handle(1);
        let dst = dummy_handle(2);
        let src = dummy_handle(3);
        writer.clear_uav_float(target, [0.0, 0.0, 0.0, 0.0]);
        writer.copy_buffer_region(dst, 0, src, 0, 1024);

        let ops = writer.into_ops();
        assert_eq!(ops.len(), 2);

        let mut replayed = Vec::new();
        replay(&ops, |op| replayed.push(op.clone()));

        assert_eq!(
            replayed,
            vec![
                RecordedOp::ClearUavFloat {
                    target,
                    value: [0.0, 0.0, 0.0, 0.0]
                },
                RecordedOp::CopyBufferRegion {
                    dst,
                    dst_offset: 0,
                    src,
                    src_offset: 0,
                    bytes: 1024,
                },
            ]
        );
    }

    #[test]
    fn op_tag_round_trips_through_u8() {
        for op in [
            Op::CopyBufferRegion,
            Op::ClearRtv,
            Op::ClearDsv,
            Op::ClearUavFloat,
            Op::ClearUavUint,
            Op::CopyTextureRegion,
            Op::CopyTextureToBuffer,
            Op::CopyBufferToTexture,
        ] {
            assert_eq!(Op::from_u8(op as u8), Some(op));
        }
    }

    #[test]
    fn accumulator_unions_strongest_access_per_cell() {
        let mut acc = AccessAccumulator::new();
        let range = SubresourceRange::all(1, 1);
        acc.touch(7, range, AccessFlags::SHADER_READ);
        acc.touch(7, range, AccessFlags::SHADER_WRITE);
        assert_eq!(acc.touched_resources().collect::<Vec<_>>(), vec![7]);
    }
}

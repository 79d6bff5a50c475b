//! Frame walking: one instant's interpreter stack out of target memory.
//!
//! Starting from the thread-state's top frame pointer, follows the
//! `f_back` chain, resolving each frame's code object into a symbolic
//! descriptor. The target must be stopped for the duration of one walk;
//! everything here is plain reads against a [`VirtualMemory`].

use std::fmt;

use crate::error::WalkError;
use crate::layout::{StringLayout, StructLayout};
use crate::locator::ThreadStateAddr;
use crate::ptracer::VirtualMemory;

/// Walk bound: a chain longer than this is assumed corrupted or cyclic
/// (the target was caught mid-mutation). Stock CPython's recursion limit
/// is three orders of magnitude below this.
pub const MAX_FRAMES: usize = 4096;

/// Upper bound on any name/filename/lnotab we will copy out; a size field
/// above it is mid-mutation garbage, not a real python string.
const MAX_STRING_LEN: i64 = 1 << 16;

/// One stack level, fully symbolic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameDescriptor {
    pub filename: String,
    pub name: String,
    pub line: i32,
}

impl FrameDescriptor {
    pub fn new(filename: &str, name: &str, line: i32) -> Self {
        FrameDescriptor {
            filename: filename.to_string(),
            name: name.to_string(),
            line,
        }
    }
}

impl fmt::Display for FrameDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.filename, self.name, self.line)
    }
}

/// Leaf-first frame sequence; empty means the thread is idle.
pub type Frames = Vec<FrameDescriptor>;

/// Reads the raw bytes of a python string-ish object at `addr`.
fn read_string_bytes(
    mem: &dyn VirtualMemory,
    layout: StringLayout,
    addr: u64,
) -> Result<Vec<u8>, WalkError> {
    let len = mem.read_i64(addr + layout.size)?;
    if len < 0 || len > MAX_STRING_LEN {
        return Err(WalkError::BadString { addr, len });
    }
    Ok(mem.read_memory(addr + layout.data, len as usize)?)
}

fn read_string(
    mem: &dyn VirtualMemory,
    layout: StringLayout,
    addr: u64,
) -> Result<String, WalkError> {
    let bytes = read_string_bytes(mem, layout, addr)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Maps a bytecode offset to a source line via the code object's line
/// number table: pairs of (bytecode delta, line delta), accumulated until
/// the bytecode offset passes `lasti`. 3.6+ stores line deltas as signed
/// bytes.
fn line_for_offset(lnotab: &[u8], firstlineno: i32, lasti: i32, signed: bool) -> i32 {
    let mut line = firstlineno;
    let mut addr: i32 = 0;
    for pair in lnotab.chunks_exact(2) {
        addr += i32::from(pair[0]);
        if addr > lasti {
            break;
        }
        line += if signed {
            i32::from(pair[1] as i8)
        } else {
            i32::from(pair[1])
        };
    }
    line
}

/// Reads the thread-state's pointer to the topmost frame. Null means the
/// thread is not currently executing python code.
pub fn first_frame_addr(
    mem: &dyn VirtualMemory,
    layout: &StructLayout,
    tstate: ThreadStateAddr,
) -> Result<u64, WalkError> {
    Ok(mem.read_u64(tstate.0 + layout.tstate_frame)?)
}

fn read_frame(
    mem: &dyn VirtualMemory,
    layout: &StructLayout,
    frame_addr: u64,
) -> Result<(FrameDescriptor, u64), WalkError> {
    let code_addr = mem.read_u64(frame_addr + layout.frame_code)?;
    let back = mem.read_u64(frame_addr + layout.frame_back)?;
    let lasti = mem.read_i32(frame_addr + layout.frame_lasti)?;

    let name_addr = mem.read_u64(code_addr + layout.code_name)?;
    let filename_addr = mem.read_u64(code_addr + layout.code_filename)?;
    let name = read_string(mem, layout.string, name_addr)?;
    let filename = read_string(mem, layout.string, filename_addr)?;

    let firstlineno = mem.read_i32(code_addr + layout.code_firstlineno)?;
    let lnotab_addr = mem.read_u64(code_addr + layout.code_lnotab)?;
    let lnotab = read_string_bytes(mem, layout.lnotab, lnotab_addr)?;
    let line = line_for_offset(&lnotab, firstlineno, lasti, layout.signed_lnotab);

    Ok((
        FrameDescriptor {
            filename,
            name,
            line,
        },
        back,
    ))
}

/// Walks the frame chain starting at `first_frame`, leaf-first, bounded by
/// [`MAX_FRAMES`]. A null `first_frame` yields the empty (idle) sequence.
pub fn walk_stack(
    mem: &dyn VirtualMemory,
    layout: &StructLayout,
    first_frame: u64,
) -> Result<Frames, WalkError> {
    let mut frames = Frames::new();
    let mut frame_addr = first_frame;
    while frame_addr != 0 {
        if frames.len() >= MAX_FRAMES {
            return Err(WalkError::DepthExceeded(MAX_FRAMES));
        }
        let (frame, back) = read_frame(mem, layout, frame_addr)?;
        frames.push(frame);
        frame_addr = back;
    }
    Ok(frames)
}

/// One tick's snapshot from the thread state down.
pub fn snapshot(
    mem: &dyn VirtualMemory,
    layout: &StructLayout,
    tstate: ThreadStateAddr,
) -> Result<Frames, WalkError> {
    let first = first_frame_addr(mem, layout, tstate)?;
    walk_stack(mem, layout, first)
}

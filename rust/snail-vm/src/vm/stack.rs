//! The reified control stack: a singly linked chain of call frames in the
//! arena. Frames are never mutated after being pushed, so any number of
//! continuations may share a suffix of the chain.

use snail_rt::{ALink, ARef, ASlice, Arena, ArenaError};

use crate::env::{EnvHeader, EnvRef};
use crate::exp::VmExpId;
use crate::values::Value;

pub type FrameRef = ARef<FrameHeader>;

/// Arena layout of a call frame: this one-block header, then the saved rib.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    return_to: VmExpId,
    env: ALink<EnvHeader>,
    link: ALink<FrameHeader>,
    rib_len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    /// Where `Return` resumes.
    pub return_to: VmExpId,
    pub env: Option<EnvRef>,
    /// Arguments collected before the call this frame brackets.
    pub rib: ASlice<Value>,
    pub link: Option<FrameRef>,
}

impl CallFrame {
    /// Push a frame on top of `link`, copying `rib` in behind the header.
    pub fn push(
        arena: &mut Arena,
        return_to: VmExpId,
        env: Option<EnvRef>,
        rib: &[Value],
        link: Option<FrameRef>,
    ) -> Result<FrameRef, ArenaError> {
        let header = FrameHeader {
            return_to,
            env: ALink::new(env),
            link: ALink::new(link),
            // A longer rib cannot fit the arena and fails to allocate.
            rib_len: u32::try_from(rib.len()).unwrap_or(u32::MAX),
        };
        arena.alloc_with_tail(header, rib)
    }

    /// Read the frame at `frame`. `None` if the handle is stale.
    pub fn load(arena: &Arena, frame: FrameRef) -> Option<Self> {
        let header = *arena.try_get(frame)?;
        let generation = frame.addr().generation();
        Some(Self {
            return_to: header.return_to,
            env: header.env.resolve(generation),
            rib: Arena::tail_of(frame, header.rib_len as usize),
            link: header.link.resolve(generation),
        })
    }
}

/// Walks a frame chain from the top. Stops early at a stale handle.
pub struct Frames<'a> {
    arena: &'a Arena,
    cursor: Option<FrameRef>,
}

impl<'a> Frames<'a> {
    pub fn new(arena: &'a Arena, top: Option<FrameRef>) -> Self {
        Self { arena, cursor: top }
    }
}

impl Iterator for Frames<'_> {
    type Item = CallFrame;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = CallFrame::load(self.arena, self.cursor?)?;
        self.cursor = frame.link;
        Some(frame)
    }
}

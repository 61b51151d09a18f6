use crate::buffer::FrameId;
use crate::error::GraniteResult;

pub trait Replacer {
    fn record_access(&mut self, frame_id: FrameId) -> GraniteResult<()>;

    fn evict(&mut self) -> Option<FrameId>;

    fn set_evictable(&mut self, frame_id: FrameId, set_evictable: bool);

    fn remove(&mut self, frame_id: FrameId);

    fn size(&self) -> usize;
}

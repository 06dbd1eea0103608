use crate::core::geo::TileId;
use crate::tiles::image::TileImage;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};

/// Freshness of a base tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    /// No pixels yet
    Empty,
    /// Pixels present but outdated or borrowed from a lower level
    Expired,
    /// Pixels downloaded or read within the expiry window
    Uptodate,
}

/// How a base tile is combined with the layers below it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeRule {
    /// Replace the accumulated image
    #[default]
    Copy,
    /// Brighten the accumulated image by this tile's red channel
    Multiply,
}

#[derive(Debug)]
struct TileData {
    image: Arc<TileImage>,
    state: TileState,
    last_modified: SystemTime,
    merge_rule: MergeRule,
}

/// One tile of one texture layer
///
/// Shared between the stacked tile it belongs to and the download that may
/// later replace its pixels, so everything mutable sits behind a lock.
#[derive(Debug)]
pub struct TextureTile {
    id: TileId,
    stacked_id: TileId,
    expire_secs: u64,
    data: RwLock<TileData>,
}

impl TextureTile {
    pub fn new(id: TileId, stacked_id: TileId, image: TileImage, state: TileState, expire_secs: u64) -> Self {
        Self {
            id,
            stacked_id,
            expire_secs,
            data: RwLock::new(TileData {
                image: Arc::new(image),
                state,
                last_modified: SystemTime::now(),
                merge_rule: MergeRule::Copy,
            }),
        }
    }

    /// A tile without pixels waiting for a download
    pub fn empty(id: TileId, stacked_id: TileId, expire_secs: u64) -> Self {
        Self::new(id, stacked_id, TileImage::null(), TileState::Empty, expire_secs)
    }

    fn read(&self) -> RwLockReadGuard<'_, TileData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TileData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    pub fn stacked_id(&self) -> TileId {
        self.stacked_id
    }

    pub fn expire_secs(&self) -> u64 {
        self.expire_secs
    }

    pub fn image(&self) -> Arc<TileImage> {
        Arc::clone(&self.read().image)
    }

    pub fn state(&self) -> TileState {
        self.read().state
    }

    pub fn set_state(&self, state: TileState) {
        self.write().state = state;
    }

    pub fn merge_rule(&self) -> MergeRule {
        self.read().merge_rule
    }

    pub fn set_merge_rule(&self, rule: MergeRule) {
        self.write().merge_rule = rule;
    }

    pub fn last_modified(&self) -> SystemTime {
        self.read().last_modified
    }

    pub fn set_last_modified(&self, time: SystemTime) {
        self.write().last_modified = time;
    }

    /// Replaces the pixels with freshly downloaded ones
    pub fn set_image(&self, image: TileImage) {
        let mut data = self.write();
        data.image = Arc::new(image);
        data.state = TileState::Uptodate;
        data.last_modified = SystemTime::now();
    }

    pub fn is_expired(&self) -> bool {
        self.state() == TileState::Expired
    }

    /// Whether `modified` lies further back than the expiry window
    pub fn is_outdated(&self, modified: SystemTime) -> bool {
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age > Duration::from_secs(self.expire_secs))
            .unwrap_or(false)
    }
}

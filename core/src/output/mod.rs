//! Result types and the latest-snapshot channels handed to visualisation.

pub mod detection;
pub mod snapshot;
pub mod status;

pub use detection::{to_cartesian, CartesianPoint, Detection, DetectionSet, MapKind};
pub use snapshot::{AxisInfo, AxisUnit, ResultSnapshot, SpectralFrame};
pub use status::{SessionState, SessionStatus, StatusBoard};

use std::sync::Arc;
use tokio::sync::watch;

type Slot = Option<Arc<ResultSnapshot>>;

struct ResultChannels {
    range: watch::Sender<Slot>,
    doppler: watch::Sender<Slot>,
    angle: watch::Sender<Slot>,
}

impl ResultChannels {
    fn sender(&self, kind: MapKind) -> &watch::Sender<Slot> {
        match kind {
            MapKind::Range => &self.range,
            MapKind::RangeDoppler => &self.doppler,
            MapKind::RangeAngle => &self.angle,
        }
    }
}

/// Writing side of the three result channels. Publishing replaces the
/// previous snapshot of that map whether or not anyone is listening.
#[derive(Clone)]
pub struct ResultPublisher {
    channels: Arc<ResultChannels>,
}

impl ResultPublisher {
    pub fn new() -> Self {
        let channels = ResultChannels {
            range: watch::channel(None).0,
            doppler: watch::channel(None).0,
            angle: watch::channel(None).0,
        };
        Self {
            channels: Arc::new(channels),
        }
    }

    pub fn publish(&self, snapshot: ResultSnapshot) {
        let kind = snapshot.kind;
        self.channels.sender(kind).send_replace(Some(Arc::new(snapshot)));
    }

    pub fn clear(&self) {
        for kind in MapKind::ALL {
            self.channels.sender(kind).send_replace(None);
        }
    }

    pub fn subscribe(&self) -> ResultSubscriber {
        ResultSubscriber {
            range: self.channels.range.subscribe(),
            doppler: self.channels.doppler.subscribe(),
            angle: self.channels.angle.subscribe(),
        }
    }
}

impl Default for ResultPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Reading side of the result channels.
#[derive(Clone)]
pub struct ResultSubscriber {
    range: watch::Receiver<Slot>,
    doppler: watch::Receiver<Slot>,
    angle: watch::Receiver<Slot>,
}

impl ResultSubscriber {
    fn receiver(&self, kind: MapKind) -> &watch::Receiver<Slot> {
        match kind {
            MapKind::Range => &self.range,
            MapKind::RangeDoppler => &self.doppler,
            MapKind::RangeAngle => &self.angle,
        }
    }

    pub fn latest(&self, kind: MapKind) -> Option<Arc<ResultSnapshot>> {
        self.receiver(kind).borrow().clone()
    }

    /// Waits for the next publication on `kind`; `false` once the publisher
    /// is gone.
    pub async fn changed(&mut self, kind: MapKind) -> bool {
        let receiver = match kind {
            MapKind::Range => &mut self.range,
            MapKind::RangeDoppler => &mut self.doppler,
            MapKind::RangeAngle => &mut self.angle,
        };
        receiver.changed().await.is_ok()
    }
}

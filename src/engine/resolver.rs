use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::feed::PointRead;
use crate::model::{EntityId, EntityKind, Row};
use crate::observability;

use super::SyncError;

/// Point-read front end for the reconciler. Transport failures and
/// mismatched rows are treated the same as not-found.
pub struct Resolver {
    reader: Arc<dyn PointRead>,
}

impl Resolver {
    pub fn new(reader: Arc<dyn PointRead>) -> Self {
        Self { reader }
    }

    pub async fn resolve(&self, kind: EntityKind, id: EntityId) -> Option<Row> {
        let started = Instant::now();
        let result = self.reader.get(kind, id, kind.relations()).await;
        metrics::histogram!(observability::POINT_READ_DURATION_SECONDS, "kind" => kind.as_str())
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(Some(row)) if row.kind() == kind && row.id() == id => Some(row),
            Ok(Some(row)) => {
                warn!(
                    "point-read of {kind} {id} returned {} {}; ignoring",
                    row.kind(),
                    row.id()
                );
                None
            }
            Ok(None) => {
                debug!("{kind} {id} gone before it could be read");
                None
            }
            Err(e) => {
                let err = SyncError::Resolution {
                    kind,
                    id,
                    message: e.to_string(),
                };
                warn!("{err}");
                None
            }
        }
    }
}

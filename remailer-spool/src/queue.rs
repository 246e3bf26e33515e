use serde::Serialize;

/// The five spool queues, each backed by a subdirectory of the spool root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    /// Awaiting timed delivery. FIFO.
    Parking,
    /// Awaiting, or undergoing, immediate delivery.
    Direct,
    /// Last delivery attempt failed.
    Error,
    /// Delivered from parking (when backups are enabled).
    ParkingBackup,
    /// Delivered from direct (when backups are enabled).
    DirectBackup,
}

impl Queue {
    pub const ALL: [Self; 5] = [
        Self::Parking,
        Self::Direct,
        Self::Error,
        Self::ParkingBackup,
        Self::DirectBackup,
    ];

    /// Subdirectory name under the spool root.
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Parking => "eml-parking",
            Self::Direct => "eml-direct",
            Self::Error => "eml-error",
            Self::ParkingBackup => "eml-parking-backup",
            Self::DirectBackup => "eml-direct-backup",
        }
    }

    /// Short label used in events and errors.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Parking => "parking",
            Self::Direct => "direct",
            Self::Error => "error",
            Self::ParkingBackup => "parking-backup",
            Self::DirectBackup => "direct-backup",
        }
    }

    /// The archive queue a successful delivery from this queue moves to.
    pub const fn backup(self) -> Option<Self> {
        match self {
            Self::Parking => Some(Self::ParkingBackup),
            Self::Direct => Some(Self::DirectBackup),
            _ => None,
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Parking => 0,
            Self::Direct => 1,
            Self::Error => 2,
            Self::ParkingBackup => 3,
            Self::DirectBackup => 4,
        }
    }
}

/// Ordered listing of every queue, as captured by a rescan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub parking: Vec<String>,
    pub direct: Vec<String>,
    pub error: Vec<String>,
    pub parking_backup: Vec<String>,
    pub direct_backup: Vec<String>,
}

impl Snapshot {
    pub fn queue(&self, queue: Queue) -> &[String] {
        match queue {
            Queue::Parking => &self.parking,
            Queue::Direct => &self.direct,
            Queue::Error => &self.error,
            Queue::ParkingBackup => &self.parking_backup,
            Queue::DirectBackup => &self.direct_backup,
        }
    }
}

#[cfg(test)]
mod test {
    use super::Queue;

    #[test]
    fn backup_targets() {
        assert_eq!(Queue::Parking.backup(), Some(Queue::ParkingBackup));
        assert_eq!(Queue::Direct.backup(), Some(Queue::DirectBackup));
        assert_eq!(Queue::Error.backup(), None);
        assert_eq!(Queue::ParkingBackup.backup(), None);
    }

    #[test]
    fn directory_names_are_stable() {
        for queue in Queue::ALL {
            assert!(queue.dir_name().starts_with("eml-"));
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Active,
    Completed,
    Canceled,
}

/// One per booking, keyed by booking id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub driver_id: Uuid,
    pub dispatcher_id: Option<Uuid>,
    pub priority: Priority,
    pub status: AssignmentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(booking_id: Uuid, driver_id: Uuid, dispatcher_id: Option<Uuid>, priority: Priority) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            booking_id,
            driver_id,
            dispatcher_id,
            priority,
            status: AssignmentStatus::Active,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn close(&mut self, status: AssignmentStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

//! Batch formation

use chrono::{DateTime, Utc};
use nanoclaw_core::prelude::*;

/// Turns a drained buffer snapshot into an immutable [`Batch`]
#[derive(Debug, Clone)]
pub struct BatchFormer {
    gateway_id: String,
}

impl BatchFormer {
    pub fn new(gateway_id: impl Into<String>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
        }
    }

    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    /// Form a batch stamped now; fails on an empty sequence
    pub fn form(&self, readings: Vec<Reading>) -> Result<Batch> {
        self.form_at(readings, Utc::now())
    }

    pub fn form_at(&self, readings: Vec<Reading>, created_at: DateTime<Utc>) -> Result<Batch> {
        Batch::form_at(self.gateway_id.clone(), readings, created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_keeps_order_and_stamps_gateway() {
        let now = Utc::now();
        let readings: Vec<Reading> = ["a", "b", "c"]
            .iter()
            .map(|n| ReadingInput::new(*n, "humidity", 40.0, "%").validate(now).unwrap())
            .collect();

        let former = BatchFormer::new("gw-1");
        let batch = former.form(readings).unwrap();

        assert_eq!(batch.gateway_id(), "gw-1");
        assert_eq!(batch.len(), 3);
        let order: Vec<&str> = batch.readings().iter().map(|r| r.node_id()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(batch.timestamp() >= now);
    }

    #[test]
    fn test_form_fails_on_empty() {
        let former = BatchFormer::new("gw-1");
        assert!(matches!(former.form(Vec::new()), Err(GatewayError::EmptyBatch)));
    }

    #[test]
    fn test_each_batch_gets_fresh_id() {
        let now = Utc::now();
        let reading = ReadingInput::new("a", "t", 1.0, "C").validate(now).unwrap();
        let former = BatchFormer::new("gw-1");

        let first = former.form(vec![reading.clone()]).unwrap();
        let second = former.form(vec![reading]).unwrap();
        assert_ne!(first.batch_id(), second.batch_id());
    }
}

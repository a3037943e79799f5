/// Labels attached to every metric emitted for a channel.
#[derive(Debug, Clone)]
pub struct TelemetryLabels {
    pub channel: String,
    pub direction: Option<String>,
    pub address: Option<String>,
    pub extra: Vec<(String, String)>,
}

impl TelemetryLabels {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            direction: None,
            address: None,
            extra: Vec::new(),
        }
    }

    pub fn with_direction(mut self, direction: impl Into<String>) -> Self {
        self.direction = Some(direction.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn tags(&self) -> Vec<(String, String)> {
        let mut tags = Vec::with_capacity(3 + self.extra.len());
        tags.push(("channel".into(), self.channel.clone()));
        if let Some(direction) = &self.direction {
            tags.push(("direction".into(), direction.clone()));
        }
        if let Some(address) = &self.address {
            tags.push(("address".into(), address.clone()));
        }
        for (key, value) in &self.extra {
            tags.push((key.clone(), value.clone()));
        }
        tags
    }
}

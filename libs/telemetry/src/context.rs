/// Label set attached to every metric emitted by the correlation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryLabels {
    pub component: String,
    pub action: Option<String>,
    pub transport: Option<String>,
    pub extra: Vec<(String, String)>,
}

impl TelemetryLabels {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            ..Self::default()
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_transport(mut self, transport: impl Into<String>) -> Self {
        let transport = transport.into();
        if !transport.is_empty() {
            self.transport = Some(transport);
        }
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    pub fn tags(&self) -> Vec<(String, String)> {
        let mut tags = Vec::with_capacity(3 + self.extra.len());
        tags.push(("component".into(), self.component.clone()));
        if let Some(action) = &self.action {
            tags.push(("action".into(), action.clone()));
        }
        if let Some(transport) = &self.transport {
            tags.push(("transport".into(), transport.clone()));
        }
        for (key, value) in &self.extra {
            tags.push((key.clone(), value.clone()));
        }
        tags
    }
}

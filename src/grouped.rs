use crate::protocol::Event;

#[derive(Debug, Clone, PartialEq)]
pub enum GroupItem {
    /// Tokens received since the last flush, joined.
    Message(String),
    Event(Event),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageGroup {
    /// `None` for events that arrived before the first stage.
    pub label: Option<String>,
    pub items: Vec<GroupItem>,
}

impl StageGroup {
    fn new(label: Option<String>) -> Self {
        Self {
            label,
            items: Vec::new(),
        }
    }
}

/// Events of one turn bucketed by the stage they arrived in.
#[derive(Debug, Default)]
pub struct StageGroups {
    groups: Vec<StageGroup>,
    pending: String,
}

impl StageGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        match event {
            Event::Stage { label } => {
                self.flush();
                self.groups.push(StageGroup::new(Some(label)));
            }
            Event::Token { text, .. } => self.pending.push_str(&text),
            Event::ToolResult { result } => {
                self.flush();
                let group = self.current();
                // Upstream may re-emit the same result inside one stage.
                let seen = group.items.iter().any(|item| {
                    matches!(item, GroupItem::Event(Event::ToolResult { result: prior }) if *prior == result)
                });
                if !seen {
                    group.items.push(GroupItem::Event(Event::ToolResult { result }));
                }
            }
            other => {
                self.flush();
                self.current().items.push(GroupItem::Event(other));
            }
        }
    }

    /// Flush buffered tokens and hand back the groups.
    pub fn finish(mut self) -> Vec<StageGroup> {
        self.flush();
        self.groups
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.pending);
        self.current().items.push(GroupItem::Message(text));
    }

    fn current(&mut self) -> &mut StageGroup {
        if self.groups.is_empty() {
            self.groups.push(StageGroup::new(None));
        }
        let last = self.groups.len() - 1;
        &mut self.groups[last]
    }
}

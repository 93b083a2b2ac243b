//! Transport-agnostic replies produced by the handlers.

use crate::allocation::SlotId;

/// A button the user can press next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Claim,
    Release,
}

impl Action {
    pub fn payload(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Release => "release",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Claim => "Взять номерок",
            Self::Release => "Сдать номерок",
        }
    }

    /// Parse callback data. Buttons sent by older deployments carry
    /// `get_hanger` / `free_hanger`.
    pub fn from_payload(data: &str) -> Option<Self> {
        match data {
            "claim" | "get_hanger" => Some(Self::Claim),
            "release" | "free_hanger" => Some(Self::Release),
            _ => None,
        }
    }
}

/// The set of actions currently valid for a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Menu {
    actions: Vec<Action>,
}

impl Menu {
    pub fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    /// `Claim` for a user holding nothing, `Release` otherwise.
    pub fn for_holding(held: Option<SlotId>) -> Self {
        match held {
            Some(_) => Self::new(vec![Action::Release]),
            None => Self::new(vec![Action::Claim]),
        }
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    Text(String),
    /// Rendered ticket for `slot`, with `caption` underneath.
    Ticket { slot: SlotId, caption: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub body: ReplyBody,
    pub menu: Option<Menu>,
    /// Remove the message whose button triggered this reply, so only the
    /// current menu stays visible.
    pub delete_previous: bool,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            body: ReplyBody::Text(text.into()),
            menu: None,
            delete_previous: false,
        }
    }

    pub fn ticket(slot: SlotId, caption: impl Into<String>) -> Self {
        Self {
            body: ReplyBody::Ticket {
                slot,
                caption: caption.into(),
            },
            menu: None,
            delete_previous: false,
        }
    }

    pub fn with_menu(mut self, menu: Menu) -> Self {
        self.menu = Some(menu);
        self
    }

    pub fn replacing_previous(mut self) -> Self {
        self.delete_previous = true;
        self
    }

    /// Text shown for the reply, the caption for tickets.
    pub fn text_content(&self) -> &str {
        match &self.body {
            ReplyBody::Text(text) => text,
            ReplyBody::Ticket { caption, .. } => caption,
        }
    }
}

/**
 * Backplane Channel Names
 *
 * Every server in a deployment derives pub/sub channel names from the same
 * prefix, so two processes that never talk to each other still agree on
 * where a group, user or connection lives. Each kind reserves its own
 * literal segment after the prefix, which keeps names of different kinds
 * from colliding even when a discriminator itself contains `:`.
 *
 * # Layout
 *
 * ```text
 * {prefix}:all
 * {prefix}:internal:groups
 * {prefix}:connection:{connection_id}
 * {prefix}:group:{group_name}
 * {prefix}:user:{user_id}
 * {prefix}:internal:ack:{server_name}
 * {prefix}:internal:return:{server_name}
 * ```
 */

/// The kinds of channel a backplane publishes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Broadcast to every connection on every server
    All,
    /// Group membership commands for connections owned by another server
    GroupManagement,
    /// A single connection
    Connection,
    /// Every member of a group
    Group,
    /// Every connection of a user
    User,
    /// Acks addressed to one server
    Ack,
    /// Client results addressed to one server
    ReturnResults,
}

/// Derives channel names from a fixed prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNamer {
    prefix: String,
}

impl ChannelNamer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Name the channel for `kind`, using `discriminator` where the kind needs one
    ///
    /// `All` and `GroupManagement` ignore the discriminator; every other kind
    /// appends it verbatim.
    ///
    /// ```rust
    /// use xfbackplane::backend::channels::{ChannelKind, ChannelNamer};
    ///
    /// let namer = ChannelNamer::new("chat");
    /// assert_eq!(namer.name(ChannelKind::Group, "lobby"), "chat:group:lobby");
    /// assert_eq!(namer.name(ChannelKind::All, ""), "chat:all");
    /// ```
    pub fn name(&self, kind: ChannelKind, discriminator: &str) -> String {
        match kind {
            ChannelKind::All => format!("{}:all", self.prefix),
            ChannelKind::GroupManagement => format!("{}:internal:groups", self.prefix),
            ChannelKind::Connection => format!("{}:connection:{}", self.prefix, discriminator),
            ChannelKind::Group => format!("{}:group:{}", self.prefix, discriminator),
            ChannelKind::User => format!("{}:user:{}", self.prefix, discriminator),
            ChannelKind::Ack => format!("{}:internal:ack:{}", self.prefix, discriminator),
            ChannelKind::ReturnResults => {
                format!("{}:internal:return:{}", self.prefix, discriminator)
            }
        }
    }

    pub fn all(&self) -> String {
        self.name(ChannelKind::All, "")
    }

    pub fn group_management(&self) -> String {
        self.name(ChannelKind::GroupManagement, "")
    }

    pub fn connection(&self, connection_id: &str) -> String {
        self.name(ChannelKind::Connection, connection_id)
    }

    pub fn group(&self, group_name: &str) -> String {
        self.name(ChannelKind::Group, group_name)
    }

    pub fn user(&self, user_id: &str) -> String {
        self.name(ChannelKind::User, user_id)
    }

    /// Channel on which `server_name` receives acks for its group commands
    pub fn ack(&self, server_name: &str) -> String {
        self.name(ChannelKind::Ack, server_name)
    }

    /// Channel on which `server_name` receives client results
    pub fn return_results(&self, server_name: &str) -> String {
        self.name(ChannelKind::ReturnResults, server_name)
    }
}

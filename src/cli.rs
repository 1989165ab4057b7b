use clap::{Parser, Subcommand};

/// Taskboard: messages, assignments and notifications
#[derive(Parser)]
#[command(name = "taskboard", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Serve {
        /// Port to bind (defaults to TASKBOARD_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Provision and list users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Notification maintenance
    Notification {
        #[command(subcommand)]
        command: NotificationCommands,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a user account
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "TASKBOARD_NEW_USER_PASSWORD")]
        password: String,
        #[arg(long)]
        department_id: Option<i64>,
        /// Grant admin rights
        #[arg(long, default_value_t = false)]
        admin: bool,
    },
    /// List all users
    List,
}

#[derive(Subcommand)]
pub enum NotificationCommands {
    /// Delete notifications that no longer have any recipient
    Prune,
}

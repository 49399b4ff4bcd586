use clap::{Parser, Subcommand};

/// Trinitas — multi-persona AI task router and orchestrator.
#[derive(Parser, Debug)]
#[command(name = "trinitas")]
#[command(version = "0.1.0")]
#[command(about = "Route tasks across a pool of model backends.", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Task deadline in seconds from now
    #[arg(long, global = true)]
    pub deadline: Option<u64>,

    /// Task priority, 1 (lowest) to 10 (highest)
    #[arg(long, global = true)]
    pub priority: Option<u8>,

    /// Force a specific executor (main, local, headless_a, headless_b)
    #[arg(long, global = true)]
    pub force_executor: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// One-shot persona execution
    Run {
        /// Persona to execute as (athena, artemis, hestia, bellona, seshat)
        persona: String,

        /// Task description
        #[arg(required = true, num_args = 1..)]
        task: Vec<String>,
    },

    /// Multi-persona collaboration: collab <mode> <persona...> -- <task>
    Collab {
        /// Coordination mode (sequential, parallel, hierarchical, consensus)
        mode: String,

        /// Personas taking part
        #[arg(required = true, num_args = 1..)]
        personas: Vec<String>,

        /// Task description (after --)
        #[arg(last = true, required = true)]
        task: Vec<String>,
    },

    /// Session lifecycle
    Session {
        #[command(subcommand)]
        session_command: SessionCommands,
    },

    /// Get or set the global execution mode
    Mode {
        #[command(subcommand)]
        mode_command: ModeCommands,
    },

    /// Print backend health, pool stats, and active session count
    Status,
}

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// Create a session and print its id
    Create {
        /// User the session belongs to
        #[arg(long, default_value = "cli")]
        user: String,
    },

    /// List active session ids
    List,

    /// Close a session
    Close { id: String },

    /// Migrate a session to a peer instance
    Migrate { id: String, target: String },
}

#[derive(Subcommand, Debug)]
pub enum ModeCommands {
    /// Print the current mode
    Get,

    /// Set the mode (full_local, claude_only, hybrid, auto)
    Set { mode: String },
}

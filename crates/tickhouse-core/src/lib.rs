pub mod command;
pub mod state;

pub use command::{
    command_channel, response_channel, Accepted, Command, CommandKind, CommandResponse,
    ResponseStatus,
};
pub use state::ConnectionState;

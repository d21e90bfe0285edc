pub type CmdResult<T> = buildreg::Result<(T, i32)>;

pub(crate) struct GlobalArgs {}

pub mod build;
pub mod compare;
pub mod config;
pub mod lock;
pub mod show;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run_json($args))
    };
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (buildreg::Result<serde_json::Value>, i32) {
    crate::tty::status("buildreg is working...");

    match command {
        // Commands without global context
        crate::Commands::Compare(args) => dispatch!(args, compare),

        // Commands with global context
        crate::Commands::Build(args) => dispatch!(args, global, build),
        crate::Commands::Show(args) => dispatch!(args, global, show),
        crate::Commands::Lock(args) => dispatch!(args, global, lock),
        crate::Commands::Config(args) => dispatch!(args, global, config),
    }
}

/// Runs `$task(&ctx, data)` every `$interval` seconds until the process exits,
/// errors are logged and don't stop the schedule.
#[macro_export]
macro_rules! spawn_task {
    ( $interval:expr, $task:expr, $ctx:ident, $data:ident ) => {
        use tokio::spawn;
        use tokio_schedule::{every, Job};
        use tracing::{error, trace};

        {
            let data = $data.to_owned();
            let ctx = $ctx.to_owned();
            spawn(every($interval).seconds().perform(move || {
                let data = data.to_owned();
                let ctx = ctx.to_owned();

                async move {
                    trace!(task = stringify!($task), "running scheduled task");
                    if let Err(err) = $task(&ctx, data.clone()).await {
                        error!(task = stringify!($task), "scheduled task failed: {}", err)
                    }
                }
            }));
        }
    };
}

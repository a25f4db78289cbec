use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use num_format::{Locale, ToFormattedString};
use poise::serenity_prelude::{self as serenity};

use crate::spawn_task;
use crate::types::{Context, Data, Error};

#[derive(Debug)]
pub(crate) struct Stats {
    pub(crate) num_cpus: usize,
    pub(crate) cpu_usage: AtomicU32,
    pub(crate) mem_usage: AtomicU64,
    pub(crate) started: chrono::DateTime<chrono::Utc>,
    sys: Mutex<sysinfo::System>,
    pid: sysinfo::Pid,
}

impl Stats {
    pub(crate) fn new() -> Self {
        let mut sys = sysinfo::System::new();
        sys.refresh_cpu_list(sysinfo::CpuRefreshKind::everything());

        Self {
            started: chrono::Utc::now(),
            num_cpus: sys.cpus().len().max(1),
            cpu_usage: AtomicU32::new(0),
            mem_usage: AtomicU64::new(0),
            sys: Mutex::new(sys),
            pid: sysinfo::Pid::from_u32(std::process::id()),
        }
    }

    pub(crate) fn set_cpu_usage(&self, cpu_usage: f32) {
        self.cpu_usage
            .store((cpu_usage * 100.) as u32, Ordering::SeqCst)
    }

    pub(crate) fn get_cpu_usage(&self) -> f32 {
        self.cpu_usage.load(Ordering::SeqCst) as f32 / 100. / self.num_cpus as f32
    }

    pub(crate) fn set_mem_usage(&self, mem_usage: u64) {
        self.mem_usage.store(mem_usage, Ordering::SeqCst)
    }

    pub(crate) fn get_mem_usage(&self) -> u64 {
        self.mem_usage.load(Ordering::SeqCst)
    }

    fn sample(&self) -> Result<(), Error> {
        let mut sys = self.sys.lock().map_err(|_| "stats mutex got poisoned")?;

        // NOTE: refreshing only our own PID reports 0% cpu, so refresh everything
        sys.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::All,
            true,
            sysinfo::ProcessRefreshKind::new().with_cpu().with_memory(),
        );

        let proc = sys
            .process(self.pid)
            .ok_or("couldn't get stats for current process")?;

        self.set_mem_usage(proc.memory());
        self.set_cpu_usage(proc.cpu_usage());

        Ok(())
    }
}

async fn update_stats(_ctx: &serenity::Context, data: Arc<Data>) -> Result<(), Error> {
    data.stats.sample()
}

fn version() -> String {
    let sha = option_env!("VERGEN_GIT_SHA").unwrap_or("unknown");
    let dirty = match option_env!("VERGEN_GIT_DIRTY") {
        Some("true") => "-dirty",
        _ => "",
    };

    format!("{} ({}{})", env!("CARGO_PKG_VERSION"), sha, dirty)
}

/// Show bot and subscription statistics
#[poise::command(slash_command)]
pub(crate) async fn stats(ctx: Context<'_>) -> Result<(), Error> {
    let time_before = chrono::Utc::now().timestamp_millis();
    let msg = ctx.reply("...").await?;
    let api_latency = chrono::Utc::now().timestamp_millis() - time_before;

    let shard_latency = {
        // Shard 0 is the shard used for DMs
        let shard_id = ctx.guild_id().map(|g| g.shard_id(ctx.cache())).unwrap_or(0);
        let shard_runners = ctx.framework().shard_manager.runners.lock().await;

        shard_runners
            .get(&serenity::ShardId(shard_id))
            .and_then(|s| s.latency)
            .map(|l| l.as_millis())
    };

    let data = ctx.data();
    let stats = &data.stats;
    let mem_usage_mb = stats.get_mem_usage() as f64 / 1024. / 1024.;
    let total = data.subscriptions.len();
    let private = data.subscriptions.private_count();

    let embed = serenity::CreateEmbed::new()
        .title("Dansub Discord Bot")
        .field("Version", version(), true)
        .field(
            "Latency",
            format!(
                "API: {} ms, Shard: {}",
                api_latency,
                shard_latency.map_or("N/A".into(), |l| format!("{} ms", l))
            ),
            true,
        )
        .field("CPU Usage", format!("{:.2} %", stats.get_cpu_usage()), true)
        .field("Memory Usage", format!("{:.02} MiB", mem_usage_mb), true)
        .field(
            "Subscriptions",
            format!(
                "{} shared, {} private",
                (total - private).to_formatted_string(&Locale::en),
                private.to_formatted_string(&Locale::en),
            ),
            true,
        )
        .footer(serenity::CreateEmbedFooter::new("Last Restarted:"))
        .timestamp(stats.started);

    msg.edit(ctx, poise::CreateReply::default().content("").embed(embed))
        .await?;
    Ok(())
}

pub(crate) fn commands() -> Vec<poise::Command<Arc<Data>, Error>> {
    vec![stats()]
}

pub(crate) fn start_tasks(ctx: serenity::Context, data: Arc<Data>) {
    spawn_task!(1, update_stats, ctx, data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_usage_is_per_core() {
        let stats = Stats::new();
        stats.set_cpu_usage(50. * stats.num_cpus as f32);

        assert!((stats.get_cpu_usage() - 50.).abs() < 0.01);
    }

    #[test]
    fn samples_own_process() {
        let stats = Stats::new();
        stats.sample().unwrap();

        assert!(stats.get_mem_usage() > 0);
    }
}

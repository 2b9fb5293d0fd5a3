#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use msm_dp::{config::Config, logger};

fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    logger::init(&config)?;

    let ret = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.threads())
        .enable_all()
        .build()?
        .block_on(msm_dp::startup(config));

    if let Err(e) = &ret {
        log::error!("data plane failed: {e:#}");
    }

    ret
}

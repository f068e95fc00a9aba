use log::LevelFilter;

mod harness;

fn init_logger() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Error)
        .filter(Some("offboard_runner"), LevelFilter::Trace)
        .is_test(true)
        .try_init();
}

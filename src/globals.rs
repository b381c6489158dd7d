use global_placeholders::init;
use macros_rs::crashln;
use sentinel::helpers;

pub fn init() {
    match home::home_dir() {
        Some(path) => {
            let base = format!("{}/.sentinel", path.display());

            init!("sentinel.base", &base);
            init!("sentinel.state", format!("{base}/state.json"));
            init!("sentinel.pid", format!("{base}/daemon.pid"));
            init!("sentinel.daemon.log", format!("{base}/daemon.log"));
            init!("sentinel.logs", format!("{base}/logs"));
        }
        None => crashln!("{} Unable to locate the home directory", *helpers::FAIL),
    }
}

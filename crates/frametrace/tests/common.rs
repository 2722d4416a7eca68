use frametrace::Config;
use std::path::PathBuf;
use tempfile::TempDir;

pub const NAME: &str = "/ndn/edu/ucla/cs/ndnrtc/user/remap/streams/video0/vp8/frames/delta/14/data/%00%00";

/// The logs of one recorded session, written into a temporary
/// directory.
pub struct Session {
    pub dir: TempDir,
    pub consumer: Vec<String>,
    pub producer: Vec<String>,
    pub local_daemon: Option<Vec<String>>,
    pub remote_daemon: Option<Vec<String>>,
    pub consumer_ntp: Option<String>,
    pub producer_ntp: Option<String>,
}

impl Session {
    /// A session whose consumer clock reads 1000 and producer clock 5000
    /// at the same wall clock time.
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            consumer: vec!["1000 [INFO ][session] unix timestamp: 1375815442.000000".into()],
            producer: vec!["5000 [INFO ][session] unix timestamp: 1375815442.000000".into()],
            local_daemon: None,
            remote_daemon: None,
            consumer_ntp: None,
            producer_ntp: None,
        }
    }

    fn write(&self, name: &str, lines: &[String]) -> PathBuf {
        let path = self.dir.path().join(name);
        let mut text = lines.join("\n");
        text.push('\n');
        std::fs::write(&path, text).unwrap();
        path
    }

    /// Write all logs and return a config pointing at them.
    pub fn config(&self) -> Config {
        let mut config = Config::new(
            self.write("consumer.log", &self.consumer),
            self.write("producer.log", &self.producer),
        );
        config.sources.local_daemon_log = self
            .local_daemon
            .as_ref()
            .map(|lines| self.write("local-ndnd.log", lines));
        config.sources.remote_daemon_log = self
            .remote_daemon
            .as_ref()
            .map(|lines| self.write("remote-ndnd.log", lines));
        config.calibration.consumer_ntp = self
            .consumer_ntp
            .as_ref()
            .map(|text| self.write("consumer-ntp.info", std::slice::from_ref(text)));
        config.calibration.producer_ntp = self
            .producer_ntp
            .as_ref()
            .map(|text| self.write("producer-ntp.info", std::slice::from_ref(text)));
        config.output = self.dir.path().join("frame-trace.log");
        config
    }

    pub fn report(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("frame-trace.log")).unwrap()
    }
}

#[allow(dead_code)]
pub fn ntpq_output(delay: f64) -> String {
    format!(
        "     remote           refid      st t when poll reach   delay   offset  jitter\n\
         ==============================================================================\n\
         *time.example.ed .GPS.            1 u   33   64  377   {delay:.3}   -0.123   0.045"
    )
}

pub mod output;
pub mod provider;

use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use iopin_core::{DeviceError, DeviceFactory, DeviceRegistry};
use output::OutputConfig;
use provider::ProviderConfig;
use serde::Deserialize;
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("error building provider: {0}")]
    Provider(#[source] DeviceError),

    #[error("error building output {name}: {source}")]
    Output {
        name: String,
        #[source]
        source: DeviceError,
    },

    #[error("invalid run_secs {0}")]
    RunTime(f64),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Deserialize, Debug)]
pub struct IopinConfig {
    pub name: Option<String>,
    pub provider: ProviderConfig,
    //run until ctrl-c when absent
    pub run_secs: Option<f64>,
    pub outputs: config_rs::Map<String, OutputConfig>,
}

impl IopinConfig {
    ///Read a config file. The extension picks the format; yaml is the one the project uses.
    pub fn load(path: &str) -> Result<Self, config_rs::ConfigError> {
        config_rs::Config::builder()
            .add_source(config_rs::File::with_name(path))
            .build()?
            .try_deserialize()
    }

    pub async fn start(self) -> Result<(), StartupError> {
        let run_time = self
            .run_secs
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(|_| StartupError::RunTime(secs)))
            .transpose()?;

        let registry = Arc::new(DeviceRegistry::new());
        let provider = self
            .provider
            .build(&registry)
            .map_err(StartupError::Provider)?;
        let factory = DeviceFactory::new(provider, registry)?;

        let result = Self::run(&self.outputs, &factory, run_time).await;
        debug!("shutting down devices ...");
        factory.shutdown();
        result
    }

    //open every output first so a bad one fails the start before any waveform plays
    async fn run(
        outputs: &config_rs::Map<String, OutputConfig>,
        factory: &DeviceFactory,
        run_time: Option<Duration>,
    ) -> Result<(), StartupError> {
        let mut devices = Vec::with_capacity(outputs.len());
        for (name, output) in outputs {
            debug!("building output {} ...", name);
            let (device, waveform) = output.open(factory).map_err(|source| StartupError::Output {
                name: name.clone(),
                source,
            })?;
            devices.push((name, device, waveform));
        }

        let started = join_all(
            devices
                .iter()
                .map(|(_, device, waveform)| OutputConfig::start(device, *waveform)),
        )
        .await;
        for ((name, _, _), result) in devices.iter().zip(started) {
            if let Err(err) = result {
                error!("output {} failed to start: {}", name, err);
            }
        }
        info!("{} output(s) running", devices.len());

        match run_time {
            Some(run_time) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("ctrl-c received"),
                    _ = tokio::time::sleep(run_time) => info!("run time elapsed"),
                }
            }
            None => {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    error!("unable to listen for ctrl-c: {}", err);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_rs::{Config, File, FileFormat};

    fn parse(yaml: &str) -> IopinConfig {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .and_then(|config| config.try_deserialize::<IopinConfig>())
            .unwrap()
    }

    const PORCH: &str = r#"
name: porch
provider: Simulated
run_secs: 2
outputs:
  status:
    pin: 18
    initial: 0.0
    waveform:
      Fade: { fade_secs: 1.0, steps: 25, iterations: ~ }
  beacon:
    pin: 23
    waveform:
      OnOff: { on_secs: 0.2, off_secs: 0.8, iterations: 10 }
  heater:
    pin: 5
    waveform:
      Set: { value: 0.4 }
"#;

    #[test]
    fn parses_outputs_and_waveforms() {
        let config = parse(PORCH);
        assert_eq!(config.name.as_deref(), Some("porch"));
        assert!(matches!(config.provider, ProviderConfig::Simulated));
        assert_eq!(config.run_secs, Some(2.0));
        assert_eq!(config.outputs.len(), 3);

        let beacon = &config.outputs["beacon"];
        assert_eq!(beacon.pin, 23);
        assert_eq!(beacon.initial, 0.0);
        assert!(matches!(
            beacon.waveform,
            iopin_core::WaveformConfig::OnOff {
                iterations: Some(10),
                ..
            }
        ));
        assert!(matches!(
            config.outputs["status"].waveform,
            iopin_core::WaveformConfig::Fade {
                steps: 25,
                iterations: None,
                ..
            }
        ));
    }

    #[test]
    fn loads_from_a_file() {
        let path = std::env::temp_dir().join(format!("iopin-load-{}.yaml", std::process::id()));
        std::fs::write(&path, PORCH).unwrap();
        let loaded = IopinConfig::load(path.to_str().unwrap());
        std::fs::remove_file(&path).unwrap();

        let config = loaded.unwrap();
        assert_eq!(config.name.as_deref(), Some("porch"));
        assert_eq!(config.outputs["heater"].pin, 5);

        assert!(IopinConfig::load("/nonexistent/iopin.yaml").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_for_the_configured_time_then_shuts_down() {
        assert!(parse(PORCH).start().await.is_ok());
    }

    #[tokio::test]
    async fn shared_pin_fails_the_start() {
        let config = parse(
            r#"
provider: Simulated
run_secs: 0
outputs:
  a:
    pin: 3
    waveform:
      Set: { value: 1.0 }
  b:
    pin: 3
    waveform:
      Set: { value: 0.0 }
"#,
        );
        assert!(matches!(
            config.start().await,
            Err(StartupError::Output {
                source: DeviceError::AlreadyOpen(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn negative_run_time_is_rejected() {
        let mut config = parse(PORCH);
        config.run_secs = Some(-1.0);
        assert!(matches!(config.start().await, Err(StartupError::RunTime(_))));
    }
}

use super::*;

use std::collections::HashSet;
use std::path::Path;

use crate::config::load_config;

/// Discovers, lists, and connects Bluetooth devices through the control tool.
///
/// Discovery, listing and disconnect run on the caller's task. Connection
/// rounds started by [`manage_connections`](Self::manage_connections) run on
/// the bounded [`ConnectionScheduler`] owned by this manager.
pub struct BluetoothManager {
    settings: Settings,
    runner: Arc<dyn CommandRunner>,
    scheduler: ConnectionScheduler,
    scan_duration: Duration,
    connection_timeout: Duration,
    scan_pattern: DevicePattern,
    list_pattern: DevicePattern,
    check: ResponseCheck,
}

impl BluetoothManager {
    /// Creates a manager that spawns `settings.bluetoothctl_path` per command.
    pub fn new(settings: Settings) -> Result<Self, ManagerError> {
        let executor = ToolExecutor::from_settings(&settings)?;
        Self::with_runner(settings, Arc::new(executor))
    }

    /// Loads settings for `channel` and creates a manager.
    pub fn from_config(config_path: Option<&Path>, channel: &str) -> Result<Self, ManagerError> {
        Self::new(load_config(config_path, channel)?)
    }

    /// Creates a manager over an arbitrary command runner.
    pub fn with_runner(
        settings: Settings,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, ManagerError> {
        settings.validate()?;
        let connection_timeout = settings.connection_timeout()?;
        let check = settings.response_check()?;
        let scheduler = ConnectionScheduler::new(
            runner.clone(),
            settings.max_connections,
            connection_timeout,
            check.clone(),
        )?;

        Ok(Self {
            scan_duration: settings.scan_duration()?,
            connection_timeout,
            scan_pattern: settings.scan_pattern()?,
            list_pattern: settings.list_pattern()?,
            check,
            scheduler,
            runner,
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn scheduler(&self) -> &ConnectionScheduler {
        &self.scheduler
    }

    /// Runs a raw command against the control tool.
    pub async fn run_command(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<String, ManagerError> {
        self.runner.execute(command, timeout).await
    }

    /// Scans for nearby devices.
    ///
    /// Issues `scan on`, waits the configured scan duration, reads `devices`,
    /// then issues `scan off`. The `devices` output is parsed with the scan
    /// pattern.
    pub async fn discover_devices(&self) -> Result<Vec<Device>, ManagerError> {
        self.runner.execute(SCAN_ON, None).await?;
        debug!("Scanning for {:?}", self.scan_duration);
        tokio::time::sleep(self.scan_duration).await;
        let output = self.runner.execute(LIST_DEVICES, None).await?;
        self.runner.execute(SCAN_OFF, None).await?;

        let devices = self.scan_pattern.parse(&output);
        debug!("Discovered {} device(s)", devices.len());
        Ok(devices)
    }

    /// Connects to one device.
    ///
    /// Returns whether the reply passed the success check. A negative reply
    /// is logged, not returned as an error.
    pub async fn connect_device(&self, address: &str) -> Result<bool, ManagerError> {
        let connected = super::scheduler::try_connect(
            self.runner.as_ref(),
            address,
            self.connection_timeout,
            &self.check,
        )
        .await?;
        Ok(connected.is_ok())
    }

    /// Disconnects every connected device.
    pub async fn disconnect_all(&self) -> Result<(), ManagerError> {
        self.runner.execute(DISCONNECT_ALL, None).await?;
        info!("All devices have been disconnected.");
        Ok(())
    }

    /// Lists currently connected devices.
    pub async fn list_connected_devices(&self) -> Result<Vec<Device>, ManagerError> {
        let output = self.runner.execute(LIST_CONNECTED, None).await?;
        Ok(self.list_pattern.parse(&output))
    }

    /// Connects every discovered device that is not already connected.
    ///
    /// Discovery and listing errors are returned. Errors of individual
    /// connect attempts are only logged and reported in the [`RoundReport`].
    pub async fn manage_connections(&self) -> Result<RoundReport, ManagerError> {
        let discovered = self.discover_devices().await?;
        let connected = self.list_connected_devices().await?;
        let pending = pending_connections(&discovered, &connected);
        debug!(
            "{} discovered, {} connected, {} to connect",
            discovered.len(),
            connected.len(),
            pending.len()
        );
        Ok(self.scheduler.connect_all(&pending).await)
    }
}

/// Addresses in `discovered` that are not in `connected`.
///
/// Matching is by address only. Discovery order is kept and repeated
/// addresses are reported once.
pub fn pending_connections(discovered: &[Device], connected: &[Device]) -> Vec<String> {
    let mut seen: HashSet<&str> = connected.iter().map(|d| d.address.as_str()).collect();
    discovered
        .iter()
        .filter(|d| seen.insert(d.address.as_str()))
        .map(|d| d.address.clone())
        .collect()
}

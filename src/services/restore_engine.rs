use crate::config::Config;
use crate::{debug_if_enabled, snap_error};
use crate::error::Result;
use crate::events::{AxWindowRef, LayoutRecord, RunningApp, WindowBounds, WindowDescriptor};
use crate::services::exclusion::is_excluded;
use crate::services::window_matcher::{match_window, MatchKind};
use crate::services::window_system::Platform;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

/// Почему дескриптор не был применён
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Excluded,
    AppNotRunning,
    LaunchTimedOut,
    NoWindows,
    Accessibility(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Excluded => write!(f, "системный процесс"),
            SkipReason::AppNotRunning => write!(f, "приложение не запущено"),
            SkipReason::LaunchTimedOut => write!(f, "приложение не запустилось вовремя"),
            SkipReason::NoWindows => write!(f, "у приложения нет окон"),
            SkipReason::Accessibility(reason) => write!(f, "ошибка Accessibility: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorOutcome {
    Positioned { kind: MatchKind },
    /// Окно уже стояло на месте в пределах допуска
    AlreadyInPlace { kind: MatchKind },
    Skipped(SkipReason),
}

impl DescriptorOutcome {
    pub fn is_applied(&self) -> bool {
        !matches!(self, DescriptorOutcome::Skipped(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorReport {
    pub owner_name: String,
    pub window_title: String,
    pub outcome: DescriptorOutcome,
}

/// Итог восстановления раскладки, по записи на каждый дескриптор в порядке захвата
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreReport {
    pub layout: String,
    pub outcomes: Vec<DescriptorReport>,
    pub raised: usize,
}

impl RestoreReport {
    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_applied()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.applied()
    }
}

impl fmt::Display for RestoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Раскладка '{}': применено {}, пропущено {}, поднято {}",
            self.layout,
            self.applied(),
            self.skipped(),
            self.raised
        )?;
        for report in &self.outcomes {
            let outcome = match &report.outcome {
                DescriptorOutcome::Positioned { kind } => format!("перемещено ({})", kind),
                DescriptorOutcome::AlreadyInPlace { kind } => format!("на месте ({})", kind),
                DescriptorOutcome::Skipped(reason) => format!("пропущено: {}", reason),
            };
            writeln!(f, "  {} \"{}\": {}", report.owner_name, report.window_title, outcome)?;
        }
        Ok(())
    }
}

// Окно, которому дескриптор задал место; нужно для подъёма
#[derive(Debug, Clone)]
struct PlacedWindow {
    handle: AxWindowRef,
    title: String,
    bounds: WindowBounds,
}

/// Применение сохранённой раскладки к живым окнам
pub struct RestoreEngine {
    config: Arc<Config>,
    platform: Platform,
    trust_prompted: AtomicBool,
}

impl RestoreEngine {
    pub fn new(config: Arc<Config>, platform: Platform) -> Self {
        Self {
            config,
            platform,
            trust_prompted: AtomicBool::new(false),
        }
    }

    /// Восстановить раскладку.
    ///
    /// Без доверия Accessibility не трогает ни одного окна. Ошибки отдельных
    /// дескрипторов попадают в отчёт и не прерывают остальные. После расстановки
    /// окна поднимаются в обратном порядке захвата, так что первое оказывается сверху.
    pub async fn restore(&self, record: &LayoutRecord) -> Result<RestoreReport> {
        self.ensure_trusted().await?;
        info!("Восстановление раскладки '{}' ({} окон)", record.name, record.windows.len());

        let mut outcomes = Vec::with_capacity(record.windows.len());
        let mut claimed: HashSet<AxWindowRef> = HashSet::new();
        let mut placed: Vec<PlacedWindow> = Vec::new();

        for (index, descriptor) in record.windows.iter().enumerate() {
            if index > 0 {
                sleep(self.config.restore.settle_delay()).await;
            }

            let (outcome, window) = self.apply_descriptor(descriptor, &mut claimed).await;
            if let DescriptorOutcome::Skipped(reason) = &outcome {
                warn!("Окно {} \"{}\" пропущено: {}", descriptor.owner_name, descriptor.window_title, reason);
            }
            if let Some(window) = window {
                placed.push(window);
            }
            outcomes.push(DescriptorReport {
                owner_name: descriptor.owner_name.clone(),
                window_title: descriptor.window_title.clone(),
                outcome,
            });
        }

        let raised = self.restack(&placed).await;

        let report = RestoreReport {
            layout: record.name.clone(),
            outcomes,
            raised,
        };
        info!(
            "Раскладка '{}' восстановлена: применено {}, пропущено {}",
            report.layout,
            report.applied(),
            report.skipped()
        );
        Ok(report)
    }

    // Запрос доверия показывается не чаще одного раза за процесс
    async fn ensure_trusted(&self) -> Result<()> {
        let accessibility = &self.platform.accessibility;
        if accessibility.is_trusted(false).await {
            return Ok(());
        }
        if !self.trust_prompted.swap(true, Ordering::SeqCst) && accessibility.is_trusted(true).await {
            return Ok(());
        }
        Err(snap_error!(permission, "нет доверия Accessibility API, окна не будут перемещены"))
    }

    async fn apply_descriptor(
        &self,
        descriptor: &WindowDescriptor,
        claimed: &mut HashSet<AxWindowRef>,
    ) -> (DescriptorOutcome, Option<PlacedWindow>) {
        if is_excluded(&descriptor.owner_name, &self.config) {
            return (DescriptorOutcome::Skipped(SkipReason::Excluded), None);
        }

        let app = match self.resolve_app(descriptor).await {
            Ok(app) => app,
            Err(reason) => return (DescriptorOutcome::Skipped(reason), None),
        };

        let candidates = match self.platform.accessibility.windows(app.pid).await {
            Ok(windows) => windows,
            Err(e) => {
                return (
                    DescriptorOutcome::Skipped(SkipReason::Accessibility(e.to_string())),
                    None,
                )
            }
        };

        let Some((window, kind)) = match_window(&descriptor.window_title, &candidates, claimed) else {
            return (DescriptorOutcome::Skipped(SkipReason::NoWindows), None);
        };
        // Одно живое окно достаётся только одному дескриптору
        claimed.insert(window.handle);
        debug_if_enabled!(
            "Окно \"{}\" сопоставлено с \"{}\" ({})",
            descriptor.window_title,
            window.title,
            kind
        );

        let target = &descriptor.bounds;
        if window.bounds.within(target, self.config.restore.position_tolerance) {
            let placed = PlacedWindow {
                handle: window.handle,
                title: window.title.clone(),
                bounds: window.bounds,
            };
            return (DescriptorOutcome::AlreadyInPlace { kind }, Some(placed));
        }

        let handle = window.handle;
        let accessibility = &self.platform.accessibility;
        if let Err(e) = accessibility.set_position(&handle, target.x, target.y).await {
            return (DescriptorOutcome::Skipped(SkipReason::Accessibility(e.to_string())), None);
        }
        if let Err(e) = accessibility.set_size(&handle, target.width, target.height).await {
            return (DescriptorOutcome::Skipped(SkipReason::Accessibility(e.to_string())), None);
        }

        let placed = PlacedWindow {
            handle,
            title: window.title.clone(),
            bounds: *target,
        };
        (DescriptorOutcome::Positioned { kind }, Some(placed))
    }

    async fn resolve_app(&self, descriptor: &WindowDescriptor) -> std::result::Result<RunningApp, SkipReason> {
        if let Some(app) = self.find_running(descriptor).await {
            return Ok(app);
        }

        let Some(bundle) = descriptor.bundle_identifier.as_deref() else {
            return Err(SkipReason::AppNotRunning);
        };

        info!("Приложение {} не запущено, запускаем {}", descriptor.owner_name, bundle);
        if let Err(e) = self.platform.apps.launch(bundle).await {
            warn!("Не удалось запустить {}: {}", bundle, e);
            return Err(SkipReason::AppNotRunning);
        }

        self.wait_for_launch(descriptor).await.ok_or(SkipReason::LaunchTimedOut)
    }

    // Опрос реестра приложений с экспоненциальной задержкой до launch_timeout
    async fn wait_for_launch(&self, descriptor: &WindowDescriptor) -> Option<RunningApp> {
        let restore = &self.config.restore;
        let deadline = Instant::now() + restore.launch_timeout();
        let mut delay = restore.launch_poll_initial();

        loop {
            if let Some(app) = self.find_running(descriptor).await {
                return Some(app);
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "Приложение {} не появилось за {:?}",
                    descriptor.owner_name,
                    restore.launch_timeout()
                );
                return None;
            }
            sleep(delay.min(deadline - now)).await;
            delay = (delay * 2).min(restore.launch_poll_max());
        }
    }

    async fn find_running(&self, descriptor: &WindowDescriptor) -> Option<RunningApp> {
        let apps = match self.platform.apps.running_apps().await {
            Ok(apps) => apps,
            Err(e) => {
                warn!("Не удалось получить список приложений: {}", e);
                return None;
            }
        };

        let by_name = apps.iter().position(|a| a.name == descriptor.owner_name);
        let by_bundle = || {
            let bundle = descriptor.bundle_identifier.as_deref()?;
            apps.iter()
                .position(|a| a.bundle_identifier.as_deref() == Some(bundle))
        };
        let index = by_name.or_else(by_bundle)?;
        apps.into_iter().nth(index)
    }

    async fn restack(&self, placed: &[PlacedWindow]) -> usize {
        let mut raised = 0;
        for window in placed.iter().rev() {
            let pid = window.handle.pid;
            if let Err(e) = self.platform.apps.activate(pid).await {
                warn!("Не удалось активировать процесс {}: {}", pid, e);
            }
            let Some(handle) = self.locate(window).await else {
                warn!("Окно \"{}\" (pid {}) не найдено перед подъёмом", window.title, pid);
                continue;
            };
            match self.platform.accessibility.raise(&handle).await {
                Ok(()) => raised += 1,
                Err(e) => warn!("Не удалось поднять окно: {}", e),
            }
        }
        raised
    }

    // Токен окна может быть его позицией в порядке наложения и сдвигается после
    // каждого подъёма, поэтому перед подъёмом окно ищется заново
    async fn locate(&self, placed: &PlacedWindow) -> Option<AxWindowRef> {
        let windows = match self.platform.accessibility.windows(placed.handle.pid).await {
            Ok(windows) => windows,
            Err(e) => {
                warn!("Не удалось получить окна процесса {}: {}", placed.handle.pid, e);
                return None;
            }
        };
        let tolerance = self.config.restore.position_tolerance;
        windows
            .iter()
            .find(|w| w.title == placed.title && w.bounds.within(&placed.bounds, tolerance))
            .or_else(|| windows.iter().find(|w| w.title == placed.title))
            .map(|w| w.handle)
    }
}

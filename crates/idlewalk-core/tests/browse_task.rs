//! End-to-end exercises of the browse loop against a scripted in-memory
//! driver: screen recognition, dedup, matching, detail visits, stale
//! recovery, and task lifecycle.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use idlewalk_core::driver::{DriverError, DriverResult};
use idlewalk_core::{
    BrowseConfig, BrowseTask, Error, FeedScanner, FeedSelectors, Finder, KeywordMatcher, Locator,
    RecognizerConfig, Recognizer, ScreenDescriptor, ScreenKind, ScreenRegistry, StopFlag, Task,
    TaskInfo, TaskManager, TaskReport, UiDriver, UiElement,
};
use tokio::time::sleep;

#[derive(Clone)]
struct ItemSpec {
    title: &'static str,
    bounds: &'static str,
    /// Title reads that fail with a stale element before one succeeds.
    stale_titles: u32,
}

fn item(title: &'static str, bounds: &'static str) -> ItemSpec {
    ItemSpec {
        title,
        bounds,
        stale_titles: 0,
    }
}

struct World {
    screen: ScreenKind,
    viewports: Vec<Vec<ItemSpec>>,
    viewport: usize,
    clicks: Vec<String>,
    backs: u32,
    feed_swipes: u32,
    detail_swipes: u32,
    stale_left: HashMap<String, u32>,
    /// Raised once the last viewport has been scrolled past, so runs end on
    /// their own.
    stop: StopFlag,
    /// Every element lookup fails fatally when set.
    fatal_lookups: bool,
    /// Anchors that resolve on the feed screen besides the feed's own.
    extra_feed_anchors: Vec<&'static str>,
}

#[derive(Clone)]
struct MockDriver {
    world: Arc<Mutex<World>>,
}

impl MockDriver {
    fn new(start: ScreenKind, viewports: Vec<Vec<ItemSpec>>, stop: StopFlag) -> Self {
        let stale_left = viewports
            .iter()
            .flatten()
            .filter(|i| i.stale_titles > 0)
            .map(|i| (i.bounds.to_string(), i.stale_titles))
            .collect();
        Self {
            world: Arc::new(Mutex::new(World {
                screen: start,
                viewports,
                viewport: 0,
                clicks: Vec::new(),
                backs: 0,
                feed_swipes: 0,
                detail_swipes: 0,
                stale_left,
                stop,
                fatal_lookups: false,
                extra_feed_anchors: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, World> {
        self.world.lock().unwrap()
    }

    fn resolve(&self, locator: &Locator) -> DriverResult<Option<Box<dyn UiElement>>> {
        let world = self.lock();
        if world.fatal_lookups {
            return Err(DriverError::Session("connection refused".into()));
        }
        let present: Box<dyn UiElement> = match locator.value.as_str() {
            "feed-anchor" | "container" if world.screen == ScreenKind::Feed => Box::new(MockNode {
                driver: self.clone(),
                role: Role::Container,
            }),
            "detail-anchor" if world.screen == ScreenKind::Detail => Box::new(MockNode {
                driver: self.clone(),
                role: Role::Anchor,
            }),
            v if world.screen == ScreenKind::Feed
                && world.extra_feed_anchors.iter().any(|a| *a == v) =>
            {
                Box::new(MockNode {
                    driver: self.clone(),
                    role: Role::Anchor,
                })
            }
            _ => return Ok(None),
        };
        Ok(Some(present))
    }
}

#[derive(Clone)]
enum Role {
    Anchor,
    Container,
    Item(ItemSpec),
    Title(&'static str),
}

#[derive(Clone)]
struct MockNode {
    driver: MockDriver,
    role: Role,
}

#[async_trait]
impl UiElement for MockNode {
    async fn is_displayed(&self) -> DriverResult<bool> {
        Ok(true)
    }

    async fn text(&self) -> DriverResult<String> {
        match &self.role {
            Role::Title(text) => Ok((*text).to_string()),
            _ => Ok(String::new()),
        }
    }

    async fn attribute(&self, name: &str) -> DriverResult<Option<String>> {
        match (&self.role, name) {
            (Role::Item(spec), "bounds") => Ok(Some(spec.bounds.to_string())),
            _ => Ok(None),
        }
    }

    async fn click(&self) -> DriverResult<()> {
        if let Role::Item(spec) = &self.role {
            let mut world = self.driver.lock();
            world.clicks.push(spec.bounds.to_string());
            world.screen = ScreenKind::Detail;
        }
        Ok(())
    }

    async fn children(&self, _locator: &Locator) -> DriverResult<Vec<Box<dyn UiElement>>> {
        match &self.role {
            Role::Container => {
                let world = self.driver.lock();
                let specs = world.viewports.get(world.viewport).cloned().unwrap_or_default();
                Ok(specs
                    .into_iter()
                    .map(|spec| {
                        Box::new(MockNode {
                            driver: self.driver.clone(),
                            role: Role::Item(spec),
                        }) as Box<dyn UiElement>
                    })
                    .collect())
            }
            Role::Item(spec) => {
                let mut world = self.driver.lock();
                if let Some(left) = world.stale_left.get_mut(spec.bounds) {
                    if *left > 0 {
                        *left -= 1;
                        return Err(DriverError::StaleElement);
                    }
                }
                Ok(vec![Box::new(MockNode {
                    driver: self.driver.clone(),
                    role: Role::Title(spec.title),
                }) as Box<dyn UiElement>])
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl UiDriver for MockDriver {
    async fn find_one(&self, locator: &Locator) -> DriverResult<Option<Box<dyn UiElement>>> {
        self.resolve(locator)
    }

    async fn find_many(&self, locator: &Locator) -> DriverResult<Vec<Box<dyn UiElement>>> {
        Ok(self.resolve(locator)?.into_iter().collect())
    }

    async fn window_size(&self) -> DriverResult<(u32, u32)> {
        Ok((1080, 2400))
    }

    async fn swipe(&self, _: i32, _: i32, _: i32, _: i32, _: u64) -> DriverResult<()> {
        let mut world = self.lock();
        if world.screen == ScreenKind::Feed {
            world.feed_swipes += 1;
            world.viewport += 1;
            if world.viewport >= world.viewports.len() {
                world.stop.stop();
            }
        } else {
            world.detail_swipes += 1;
        }
        Ok(())
    }

    async fn back(&self) -> DriverResult<()> {
        let mut world = self.lock();
        world.backs += 1;
        world.screen = ScreenKind::Feed;
        Ok(())
    }

    async fn screenshot(&self, _path: &Path) -> DriverResult<()> {
        Ok(())
    }

    async fn quit(&self) -> DriverResult<()> {
        Ok(())
    }
}

fn registry() -> ScreenRegistry {
    let mut reg = ScreenRegistry::new();
    reg.register(ScreenDescriptor::new(
        ScreenKind::Feed,
        vec![Locator::id("feed-anchor"), Locator::id("container")],
    ));
    reg.register(ScreenDescriptor::new(
        ScreenKind::Detail,
        vec![Locator::id("detail-anchor")],
    ));
    reg
}

fn selectors() -> FeedSelectors {
    FeedSelectors {
        container: Locator::id("container"),
        item: Locator::class_name("Item"),
        title: Locator::class_name("Title"),
    }
}

fn fast_config() -> BrowseConfig {
    BrowseConfig {
        retries: 3,
        ensure_feed_attempts: 3,
        feed_backoff: Duration::from_millis(5),
        detail_wait: Duration::from_secs(2),
        scroll_duration_ms: 10,
        detail_scroll_duration_ms: 10,
        dwell_scrolls: (1, 1),
        dwell_pause_ms: (0, 1),
        final_dwell_ms: (0, 1),
        upward_drift_chance: 0.0,
        post_click_settle: Duration::from_millis(1),
        post_back_settle: Duration::from_millis(1),
        post_scroll_settle: Duration::from_millis(1),
        scan_pause: Duration::from_millis(1),
        recognizer: RecognizerConfig {
            identifier_timeout: Duration::from_millis(50),
            revalidate_timeout: Duration::from_millis(50),
        },
    }
}

fn browse_task(driver: &MockDriver, keywords: &[&str], config: BrowseConfig) -> BrowseTask {
    let matcher = KeywordMatcher::new(keywords.iter().map(|k| k.to_string()).collect(), false);
    BrowseTask::with_config(
        Arc::new(driver.clone()),
        registry(),
        selectors(),
        matcher.into_predicate(),
        config,
    )
}

#[tokio::test]
async fn processes_every_item_and_visits_matches() {
    let stop = StopFlag::new();
    let driver = MockDriver::new(
        ScreenKind::Feed,
        vec![
            vec![
                item("chiikawa plush, brand new", "[0,0][1080,400]"),
                item("vintage lamp", "[0,400][1080,800]"),
                item("desk chair", "[0,800][1080,1200]"),
            ],
            vec![item("chiikawa keychain", "[0,0][1080,400]")],
        ],
        stop.clone(),
    );
    let task = browse_task(&driver, &["chiikawa"], fast_config());

    let report = task.run(stop).await.unwrap();

    assert_eq!(report.total_processed, 4);
    assert_eq!(report.matched, 2);
    assert!(report.stopped);
    let world = driver.lock();
    assert_eq!(
        world.clicks,
        vec!["[0,0][1080,400]".to_string(), "[0,0][1080,400]".to_string()]
    );
    // One back navigation per detail visit.
    assert_eq!(world.backs, 2);
    // Dwell scrolls happened on the detail screen, not the feed.
    assert_eq!(world.detail_swipes, 2);
}

#[tokio::test]
async fn non_matching_items_are_processed_but_never_clicked() {
    let stop = StopFlag::new();
    let driver = MockDriver::new(
        ScreenKind::Feed,
        vec![vec![
            item("vintage lamp", "[0,0][1080,400]"),
            item("desk chair", "[0,400][1080,800]"),
        ]],
        stop.clone(),
    );
    let task = browse_task(&driver, &["chiikawa"], fast_config());

    let report = task.run(stop).await.unwrap();

    assert_eq!(report.total_processed, 2);
    assert_eq!(report.matched, 0);
    let world = driver.lock();
    assert!(world.clicks.is_empty());
    assert_eq!(world.backs, 0);
}

#[tokio::test]
async fn stale_title_reads_recover_within_retry_budget() {
    let stop = StopFlag::new();
    let flaky = ItemSpec {
        title: "chiikawa figure",
        bounds: "[0,0][1080,400]",
        stale_titles: 2,
    };
    let driver = MockDriver::new(
        ScreenKind::Feed,
        vec![vec![flaky, item("vintage lamp", "[0,400][1080,800]")]],
        stop.clone(),
    );
    let task = browse_task(&driver, &["chiikawa"], fast_config());

    let report = task.run(stop).await.unwrap();

    // Two stale failures fit inside retries = 3, so the item is read.
    assert_eq!(report.total_processed, 2);
    assert_eq!(report.matched, 1);
}

#[tokio::test]
async fn persistently_stale_item_is_skipped_not_fatal() {
    let stop = StopFlag::new();
    let broken = ItemSpec {
        title: "never readable",
        bounds: "[0,0][1080,400]",
        stale_titles: 100,
    };
    let driver = MockDriver::new(
        ScreenKind::Feed,
        vec![vec![broken, item("vintage lamp", "[0,400][1080,800]")]],
        stop.clone(),
    );
    let task = browse_task(&driver, &["lamp"], fast_config());

    let report = task.run(stop).await.unwrap();

    // The unreadable item never counts as processed; the rest still do.
    assert_eq!(report.total_processed, 1);
    assert_eq!(report.matched, 1);
}

#[tokio::test]
async fn detail_screen_at_start_is_backed_out_of() {
    let stop = StopFlag::new();
    let driver = MockDriver::new(
        ScreenKind::Detail,
        vec![vec![item("vintage lamp", "[0,0][1080,400]")]],
        stop.clone(),
    );
    let task = browse_task(&driver, &["nothing"], fast_config());

    let report = task.run(stop).await.unwrap();

    assert_eq!(report.total_processed, 1);
    assert!(driver.lock().backs >= 1);
}

#[tokio::test]
async fn pre_stopped_flag_means_no_driver_interaction() {
    let stop = StopFlag::new();
    stop.stop();
    let driver = MockDriver::new(
        ScreenKind::Feed,
        vec![vec![item("chiikawa plush", "[0,0][1080,400]")]],
        stop.clone(),
    );
    let task = browse_task(&driver, &["chiikawa"], fast_config());

    let report = task.run(stop).await.unwrap();

    assert!(report.stopped);
    assert_eq!(report.total_processed, 0);
    let world = driver.lock();
    assert!(world.clicks.is_empty());
    assert_eq!(world.feed_swipes, 0);
}

#[tokio::test]
async fn fatal_driver_failure_propagates() {
    let stop = StopFlag::new();
    let driver = MockDriver::new(
        ScreenKind::Feed,
        vec![vec![item("vintage lamp", "[0,0][1080,400]")]],
        stop.clone(),
    );
    driver.lock().fatal_lookups = true;
    let task = browse_task(&driver, &["lamp"], fast_config());

    let err = task.run(stop).await.unwrap_err();
    assert!(matches!(err, Error::Driver(DriverError::Session(_))));
}

#[tokio::test]
async fn recognition_follows_registration_order() {
    let stop = StopFlag::new();
    let driver = MockDriver::new(ScreenKind::Feed, Vec::new(), stop);
    driver.lock().extra_feed_anchors = vec!["services-anchor"];

    // Both anchors resolve; whichever descriptor registered first wins.
    let mut services_first = ScreenRegistry::new();
    services_first.register(ScreenDescriptor::new(
        ScreenKind::Services,
        vec![Locator::id("services-anchor")],
    ));
    services_first.register(ScreenDescriptor::new(
        ScreenKind::Feed,
        vec![Locator::id("feed-anchor")],
    ));
    let finder = Finder::new(Arc::new(driver.clone()));
    let mut recognizer = Recognizer::with_config(
        finder.clone(),
        services_first,
        RecognizerConfig {
            identifier_timeout: Duration::from_millis(50),
            revalidate_timeout: Duration::from_millis(50),
        },
    );
    let screen = recognizer.recognize().await.unwrap().unwrap();
    assert_eq!(screen.kind, ScreenKind::Services);

    let mut feed_first = ScreenRegistry::new();
    feed_first.register(ScreenDescriptor::new(
        ScreenKind::Feed,
        vec![Locator::id("feed-anchor")],
    ));
    feed_first.register(ScreenDescriptor::new(
        ScreenKind::Services,
        vec![Locator::id("services-anchor")],
    ));
    let mut recognizer = Recognizer::with_config(
        finder,
        feed_first,
        RecognizerConfig {
            identifier_timeout: Duration::from_millis(50),
            revalidate_timeout: Duration::from_millis(50),
        },
    );
    let screen = recognizer.recognize().await.unwrap().unwrap();
    assert_eq!(screen.kind, ScreenKind::Feed);
}

#[tokio::test]
async fn recognition_is_deterministic_for_unchanged_ui() {
    let stop = StopFlag::new();
    let driver = MockDriver::new(ScreenKind::Feed, Vec::new(), stop);
    let finder = Finder::new(Arc::new(driver));
    let mut recognizer = Recognizer::with_config(
        finder,
        registry(),
        RecognizerConfig {
            identifier_timeout: Duration::from_millis(50),
            revalidate_timeout: Duration::from_millis(50),
        },
    );
    for _ in 0..3 {
        let screen = recognizer.recognize().await.unwrap().unwrap();
        assert_eq!(screen.kind, ScreenKind::Feed);
    }
    assert_eq!(recognizer.current(), Some(ScreenKind::Feed));
}

struct StaticItem;

#[async_trait]
impl UiElement for StaticItem {
    async fn is_displayed(&self) -> DriverResult<bool> {
        Ok(true)
    }

    async fn text(&self) -> DriverResult<String> {
        Ok(String::new())
    }

    async fn attribute(&self, _name: &str) -> DriverResult<Option<String>> {
        Ok(None)
    }

    async fn click(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn children(&self, _locator: &Locator) -> DriverResult<Vec<Box<dyn UiElement>>> {
        Ok(Vec::new())
    }
}

/// Container whose child listing goes stale a fixed number of times before
/// succeeding.
struct FlakyContainer {
    failures: Mutex<u32>,
    item_count: usize,
}

#[async_trait]
impl UiElement for FlakyContainer {
    async fn is_displayed(&self) -> DriverResult<bool> {
        Ok(true)
    }

    async fn text(&self) -> DriverResult<String> {
        Ok(String::new())
    }

    async fn attribute(&self, _name: &str) -> DriverResult<Option<String>> {
        Ok(None)
    }

    async fn click(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn children(&self, _locator: &Locator) -> DriverResult<Vec<Box<dyn UiElement>>> {
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(DriverError::StaleElement);
        }
        Ok((0..self.item_count)
            .map(|_| Box::new(StaticItem) as Box<dyn UiElement>)
            .collect())
    }
}

#[tokio::test]
async fn item_listing_recovers_when_retries_cover_the_failures() {
    let stop = StopFlag::new();
    let driver = MockDriver::new(ScreenKind::Feed, Vec::new(), stop);
    let scanner = FeedScanner::new(Arc::new(driver), selectors());

    let container = FlakyContainer {
        failures: Mutex::new(2),
        item_count: 3,
    };
    let items = scanner.items(&container, 3).await.unwrap();
    assert_eq!(items.len(), 3);
}

#[tokio::test]
async fn item_listing_yields_empty_when_retries_are_exhausted() {
    let stop = StopFlag::new();
    let driver = MockDriver::new(ScreenKind::Feed, Vec::new(), stop);
    let scanner = FeedScanner::new(Arc::new(driver), selectors());

    let container = FlakyContainer {
        failures: Mutex::new(2),
        item_count: 3,
    };
    let items = scanner.items(&container, 2).await.unwrap();
    assert!(items.is_empty());
}

struct RunUntilStopped;

#[async_trait]
impl Task for RunUntilStopped {
    fn info(&self) -> TaskInfo {
        TaskInfo {
            id: "long",
            name: "Long",
            description: "runs until stopped",
        }
    }

    async fn run(&self, stop: StopFlag) -> idlewalk_core::Result<TaskReport> {
        while stop.is_running() {
            sleep(Duration::from_millis(5)).await;
        }
        Ok(TaskReport {
            stopped: true,
            ..Default::default()
        })
    }
}

#[tokio::test]
async fn starting_a_task_stops_the_previous_one() {
    let mut mgr = TaskManager::new();
    mgr.register(
        TaskInfo {
            id: "long",
            name: "Long",
            description: "runs until stopped",
        },
        || Arc::new(RunUntilStopped),
    );
    let mgr = Arc::new(mgr);

    let first = tokio::spawn({
        let mgr = Arc::clone(&mgr);
        async move { mgr.run("long").await }
    });
    // Wait for the first run to register its flag.
    let first_flag = loop {
        if let Some(flag) = mgr.active() {
            break flag;
        }
        sleep(Duration::from_millis(2)).await;
    };
    assert!(first_flag.is_running());

    let second = tokio::spawn({
        let mgr = Arc::clone(&mgr);
        async move { mgr.run("long").await }
    });
    // The second run replaces the active flag and stops the first one
    // before its task begins.
    loop {
        if let Some(flag) = mgr.active() {
            if !flag.same(&first_flag) {
                break;
            }
        }
        sleep(Duration::from_millis(2)).await;
    }
    assert!(!first_flag.is_running());
    let first_report = first.await.unwrap().unwrap();
    assert!(first_report.stopped);

    mgr.stop();
    let second_report = second.await.unwrap().unwrap();
    assert!(second_report.stopped);
    assert!(mgr.active().is_none());
}

//! Chrome DevTools backed [`BrowserSession`], driven synchronously through a
//! private tokio runtime.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Element, Page};
use futures::StreamExt;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::browser::{BrowserError, BrowserSession, Locator};

pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/60.0.3112.50 Safari/537.36";

const CHROME_FLAGS: &[&str] = &[
    "--no-sandbox",
    "--disable-extensions",
    "--disable-application-cache",
    "--disable-gpu",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
];

#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub headless: bool,
    pub window: (u32, u32),
    pub user_agent: String,
    pub poll_interval: Duration,
}

impl Default for ChromeOptions {
    fn default() -> Self {
        Self {
            headless: true,
            window: (1920, 1080),
            user_agent: DESKTOP_USER_AGENT.to_string(),
            poll_interval: Duration::from_millis(500),
        }
    }
}

pub struct ChromeSession {
    runtime: Runtime,
    browser: Option<Browser>,
    page: Page,
    handler: JoinHandle<()>,
    poll_interval: Duration,
}

fn driver_error(err: impl std::fmt::Display) -> BrowserError {
    BrowserError::Driver(err.to_string())
}

fn navigation_error(err: impl std::fmt::Display) -> BrowserError {
    let text = err.to_string();
    if text.contains("net::ERR_") || text.to_ascii_lowercase().contains("connection") {
        BrowserError::Connection(text)
    } else {
        BrowserError::Driver(text)
    }
}

enum Query<'a> {
    Css(String),
    XPath(&'a str),
}

fn query_for(locator: &Locator) -> Query<'_> {
    match locator {
        Locator::Id(v) => Query::Css(format!("[id=\"{v}\"]")),
        Locator::Name(v) => Query::Css(format!("[name=\"{v}\"]")),
        Locator::ClassName(v) => Query::Css(format!(".{v}")),
        Locator::Css(v) => Query::Css(v.clone()),
        Locator::XPath(v) => Query::XPath(v),
    }
}

async fn find_one(page: &Page, locator: &Locator) -> chromiumoxide::Result<Element> {
    match query_for(locator) {
        Query::Css(css) => page.find_element(css).await,
        Query::XPath(xpath) => page.find_xpath(xpath).await,
    }
}

async fn find_many(page: &Page, locator: &Locator) -> chromiumoxide::Result<Vec<Element>> {
    match query_for(locator) {
        Query::Css(css) => page.find_elements(css).await,
        Query::XPath(xpath) => page.find_xpaths(xpath).await,
    }
}

async fn is_rendered(element: &Element) -> bool {
    match element.bounding_box().await {
        Ok(bbox) => bbox.width > 0.0 && bbox.height > 0.0,
        Err(_) => false,
    }
}

impl ChromeSession {
    pub fn launch(options: &ChromeOptions) -> Result<Self, BrowserError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BrowserError::Driver(format!("starting browser runtime: {e}")))?;

        let (width, height) = options.window;
        let mut builder = BrowserConfig::builder()
            .window_size(width, height)
            .arg(format!("--user-agent={}", options.user_agent));
        for flag in CHROME_FLAGS {
            builder = builder.arg(*flag);
        }
        if !options.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::Driver)?;

        let (browser, mut handler) = runtime.block_on(Browser::launch(config)).map_err(driver_error)?;
        let handler = runtime.spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    warn!(error = %err, "chrome handler event error");
                }
            }
        });
        let page = runtime
            .block_on(browser.new_page("about:blank"))
            .map_err(driver_error)?;

        info!(headless = options.headless, width, height, "chrome session started");
        Ok(Self {
            runtime,
            browser: Some(browser),
            page,
            handler,
            poll_interval: options.poll_interval,
        })
    }

    fn ensure_open(&self) -> Result<(), BrowserError> {
        if self.browser.is_some() {
            Ok(())
        } else {
            Err(BrowserError::Closed)
        }
    }
}

impl BrowserSession for ChromeSession {
    type Element = Element;

    fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.runtime
            .block_on(async { self.page.goto(url).await.map(|_| ()) })
            .map_err(navigation_error)
    }

    fn wait_for_visible(&mut self, locator: &Locator, timeout: Duration) -> Result<Element, BrowserError> {
        self.ensure_open()?;
        let started = Instant::now();
        loop {
            let found = self.runtime.block_on(async {
                match find_one(&self.page, locator).await {
                    Ok(element) if is_rendered(&element).await => Some(element),
                    _ => None,
                }
            });
            if let Some(element) = found {
                return Ok(element);
            }
            if started.elapsed() >= timeout {
                return Err(BrowserError::Timeout {
                    locator: locator.clone(),
                    timeout,
                });
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn find_all(&mut self, locator: &Locator) -> Result<Vec<Element>, BrowserError> {
        self.ensure_open()?;
        self.runtime
            .block_on(find_many(&self.page, locator))
            .map_err(driver_error)
    }

    fn click(&mut self, element: &Element) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.runtime
            .block_on(async { element.click().await.map(|_| ()) })
            .map_err(driver_error)
    }

    fn type_text(&mut self, element: &Element, text: &str) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.runtime
            .block_on(async {
                element.click().await?;
                element.type_str(text).await.map(|_| ())
            })
            .map_err(driver_error)
    }

    fn scroll_to_fraction(&mut self, fraction: f64) -> Result<(), BrowserError> {
        self.ensure_open()?;
        let script = format!("window.scrollTo(0, document.body.scrollHeight * {fraction});");
        self.runtime
            .block_on(async { self.page.evaluate(script).await.map(|_| ()) })
            .map_err(driver_error)
    }

    fn page_source(&mut self) -> Result<String, BrowserError> {
        self.ensure_open()?;
        self.runtime.block_on(self.page.content()).map_err(driver_error)
    }

    fn title(&mut self) -> Result<String, BrowserError> {
        self.ensure_open()?;
        self.runtime
            .block_on(self.page.get_title())
            .map(Option::unwrap_or_default)
            .map_err(driver_error)
    }

    fn capture_diagnostic(&mut self, dir: &Path) -> Result<PathBuf, BrowserError> {
        self.ensure_open()?;
        fs::create_dir_all(dir).map_err(driver_error)?;
        let path = dir.join(format!("page_load_timeout_{}.png", Utc::now().format("%Y%m%d_%H%M%S")));
        let params = ScreenshotParams::builder().full_page(true).build();
        self.runtime
            .block_on(self.page.save_screenshot(params, &path))
            .map_err(driver_error)?;
        info!(path = %path.display(), "saved diagnostic screenshot");
        Ok(path)
    }

    fn close(&mut self) -> Result<(), BrowserError> {
        let Some(mut browser) = self.browser.take() else {
            return Ok(());
        };
        let result = self.runtime.block_on(async {
            browser.close().await.map_err(driver_error)?;
            browser.wait().await.map_err(driver_error)?;
            Ok::<(), BrowserError>(())
        });
        self.handler.abort();
        info!("chrome session closed");
        result
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "closing chrome on drop failed");
        }
    }
}

pub mod cdp;
pub mod chrome;
pub mod driver;
pub mod page;
pub mod process;

pub use chrome::{find_browser_binary, ChromeBrowser, ChromeDriver};
pub use driver::{BrowserDriver, BrowserHandle, Page, WaitOptions};
pub use page::ChromePage;
pub use process::{ProcessControl, Signal, SystemProcesses};

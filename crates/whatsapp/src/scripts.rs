//! In-page JavaScript functions passed to `Page::evaluate`. Every selector
//! arrives as an argument so the scripts stay locator-agnostic.

/// `(bodySelector, metaAttribute, visibleName) -> string[]`
///
/// Inbound message bodies, minus the sender prefix, skipping anything
/// attributed to `visibleName`.
pub const COLLECT_MESSAGES: &str = r#"(bodySelector, metaAttribute, visibleName) => {
    return Array.from(document.querySelectorAll(bodySelector))
        .map(el => {
            const meta = el.getAttribute(metaAttribute);
            if (!meta || meta.includes(visibleName)) {
                return null;
            }
            return (el.innerText || '').replace(meta, '').trim();
        })
        .filter(Boolean);
}"#;

/// `(rowSelector, nameSelector, timeSelector, lastSelector, receiptSelectors, maxCount)
///   -> {chatName, lastMessageTime, lastMessage}[]`
///
/// Rows whose last message carries a delivery/read receipt were sent by us
/// and are skipped.
pub const LIST_CHATS: &str = r#"(rowSelector, nameSelector, timeSelector, lastSelector, receiptSelectors, maxCount) => {
    const chats = [];
    document.querySelectorAll(rowSelector).forEach(row => {
        const name = row.querySelector(nameSelector);
        const time = row.querySelector(timeSelector);
        const last = row.querySelector(lastSelector);
        const sentByUs = receiptSelectors.some(sel => row.querySelector(sel));
        if (name && time && !sentByUs) {
            chats.push({
                chatName: name.innerText,
                lastMessageTime: time.innerText,
                lastMessage: last ? last.innerText : ''
            });
        }
    });
    return chats.slice(0, maxCount);
}"#;

/// `(iconSelector, index) -> bool`
pub const OPEN_MENU: &str = r#"(iconSelector, index) => {
    const icon = document.querySelectorAll(iconSelector)[index];
    if (!icon) {
        return false;
    }
    icon.click();
    return true;
}"#;

/// `(buttonSelector, label) -> bool`
pub const CLICK_LABELED: &str = r#"(buttonSelector, label) => {
    const button = Array.from(document.querySelectorAll(buttonSelector))
        .find(el => el.textContent === label);
    if (!button) {
        return false;
    }
    button.click();
    return true;
}"#;

/// `(primarySelector, candidateSelector, marker) -> string | null`
pub const SCRAPE_PHONE: &str = r#"(primarySelector, candidateSelector, marker) => {
    const primary = document.querySelector(primarySelector);
    if (primary && primary.innerText.includes(marker)) {
        return primary.innerText;
    }
    let found = null;
    document.querySelectorAll(candidateSelector).forEach(span => {
        const text = span.innerText || span.textContent || '';
        if (text.includes(marker)) {
            found = text;
        }
    });
    return found;
}"#;

/// `(containerSelector, itemSelector, stepPx, intervalMs) -> Promise<string[]>`
///
/// Scrolls the container in fixed steps until its full height has been
/// covered, collecting every rendered item name along the way.
pub const SCROLL_COLLECT_NAMES: &str = r#"async (containerSelector, itemSelector, stepPx, intervalMs) => {
    const container = document.querySelector(containerSelector);
    const names = new Set();
    if (!container) {
        return [];
    }
    await new Promise(resolve => {
        let covered = 0;
        const timer = setInterval(() => {
            const height = container.scrollHeight;
            container.scrollBy(0, stepPx);
            covered += stepPx;
            document.querySelectorAll(itemSelector).forEach(el => {
                if (el.innerText) {
                    names.add(el.innerText);
                }
            });
            if (covered >= height) {
                clearInterval(timer);
                resolve();
            }
        }, intervalMs);
    });
    return Array.from(names);
}"#;

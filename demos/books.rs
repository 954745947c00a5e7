use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bramble::error::{RuleError, StorageError};
use bramble::fetcher::BrowserFetcher;
use bramble::limiter::{MultiLimiter, Rate, RateLimit, TokenBucket};
use bramble::{
    Config, Context, DataCell, Item, ParseFunc, ParseResult, Property, Request, RootFunc, Rule,
    RuleTree, Seed, Storage, Task, TaskRegistry,
};
use scraper::{Html, Selector};

const START_URL: &str = "https://books.toscrape.com/";

/// Prints every record as a JSON line.
pub struct StdoutStorage;

#[async_trait]
impl Storage for StdoutStorage {
    async fn save(&self, cell: &DataCell) -> Result<(), StorageError> {
        let line = serde_json::to_string(cell).map_err(|e| StorageError::Backend(e.to_string()))?;
        println!("{}", line);
        Ok(())
    }
}

fn selector(css: &str) -> Result<Selector, RuleError> {
    Selector::parse(css).map_err(|e| RuleError::Message(format!("bad selector `{}`: {:?}", css, e)))
}

fn parse_list(ctx: &Context) -> Result<ParseResult, RuleError> {
    let document = Html::parse_document(&ctx.text());
    let mut result = ParseResult::default();

    for link in document.select(&selector("article.product_pod h3 a")?) {
        if let Some(href) = link.value().attr("href") {
            let url = bramble::join_url(&ctx.req.url, href)?;
            result.requests.push(ctx.child(url, "book").with_priority(1));
        }
    }
    if let Some(next) = document.select(&selector("li.next a")?).next() {
        if let Some(href) = next.value().attr("href") {
            let url = bramble::join_url(&ctx.req.url, href)?;
            result.requests.push(ctx.child(url, "list"));
        }
    }
    Ok(result)
}

fn parse_book(ctx: &Context) -> Result<ParseResult, RuleError> {
    let document = Html::parse_document(&ctx.text());
    let text = |css: &str| -> Result<String, RuleError> {
        Ok(document
            .select(&selector(css)?)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_owned())
            .unwrap_or_default())
    };
    let data = serde_json::json!({
        "title": text("div.product_main h1")?,
        "price": text("p.price_color")?,
    });
    Ok(ParseResult {
        requests: vec![],
        items: vec![Item::Record(ctx.output(data))],
    })
}

fn books_task() -> Task {
    let property = Property {
        name: "books".to_owned(),
        url: START_URL.to_owned(),
        wait_time: 1,
        max_depth: 60,
        ..Default::default()
    };
    let root = RootFunc::new(|task: &Arc<Task>| {
        Ok(vec![Request::new(task.clone(), task.property.url.clone(), "list")])
    });
    let rule = RuleTree::new(root)
        .rule("list", Rule::new(ParseFunc::new(parse_list)))
        .rule(
            "book",
            Rule::new(ParseFunc::new(parse_book)).with_item_fields(["title", "price"]),
        );
    Task::new(property, rule).with_storage(Arc::new(StdoutStorage))
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut registry = TaskRegistry::new();
    registry.register(books_task());

    let limiter = MultiLimiter::new(vec![
        Arc::new(TokenBucket::new(Rate::every(Duration::from_secs(1)), 2)) as Arc<dyn RateLimit>,
        Arc::new(TokenBucket::new(Rate::per(40, Duration::from_secs(60)), 10)),
    ]);
    let fetcher = match BrowserFetcher::new(Duration::from_secs(30), None) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            log::error!("can't build fetcher: {}", e);
            return;
        }
    };
    let seed = Seed::new("books")
        .fetcher(Arc::new(fetcher))
        .limiter(Arc::new(limiter));

    let config = Config {
        workers: 4,
        min_body_len: 1000,
        report_interval_secs: 15,
        ..Default::default()
    };
    let mut engine = match bramble::engine_with_config(config, registry, vec![seed]) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("{}", e);
            return;
        }
    };

    let stop_tx = engine.stop_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    }) {
        log::warn!("can't install ctrl-c handler: {}", e);
    }

    if let Err(e) = engine.start().await {
        log::error!("{}", e);
    }
}

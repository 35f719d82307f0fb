//! Heuristic shopping assistant.
//!
//! Stateless per message: normalize the text, pull out keywords, intent
//! flags and an optional budget, then rank matching products.

use std::collections::HashSet;
use std::sync::Arc;

use lazy_static::lazy_static;
use metrics::counter;
use regex::{Captures, Regex};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Func, SimpleExpr},
    ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Select,
};
use serde::Serialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::product::{self, Category};
use crate::errors::ServiceError;
use crate::services::catalog::keyword_condition;

pub const MAX_KEYWORDS: usize = 5;
pub const MAX_SUGGESTIONS: usize = 5;
pub const MAX_MESSAGE_CHARS: usize = 500;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "you", "your", "are", "can", "could", "would", "what", "which",
    "have", "has", "any", "some", "this", "that", "there", "these", "those", "about", "into",
    "please", "pls", "plz", "hello", "thanks", "thank", "help", "need", "want", "looking",
    "suggest", "suggestion", "suggestions", "recommend", "recommendation", "show", "find",
    "give", "tell", "get", "buy", "good", "best", "better", "bad", "top", "nice", "great",
    "worth", "quality", "review", "reviews", "reliable", "under", "below", "above", "over",
    "less", "more", "than", "within", "upto", "max", "maximum", "min", "minimum", "least",
    "between", "from", "range", "price", "prices", "cost", "budget", "cheap", "cheaper",
    "expensive", "how", "much", "taka", "bdt", "stock", "available", "availability", "left",
    "item", "items", "product", "products", "something", "one", "also", "just", "all",
];

lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"[^\p{L}\p{N}৳\-]+").unwrap();
    static ref BUDGET_FIGURE: Regex = Regex::new(r"^৳?\d+k?(-৳?\d+k?)?$").unwrap();

    static ref WANTS_SUGGESTION: Regex =
        Regex::new(r"\b(suggest\w*|recommend\w*|show|find|looking|need|want|best|top|which|options?)\b").unwrap();
    static ref ASKS_QUALITY: Regex =
        Regex::new(r"\b(good|bad|worth|quality|reviews?|reliable|better)\b").unwrap();
    static ref ASKS_PRICE: Regex =
        Regex::new(r"(\b(price|prices|cost|how much|budget|cheap|cheaper|expensive|tk|taka|bdt)\b)|৳").unwrap();
    static ref ASKS_STOCK: Regex =
        Regex::new(r"\b(stock|available|availability|left)\b").unwrap();

    static ref BETWEEN: Regex =
        Regex::new(r"\bbetween\s*৳?\s*(\d+)(?:\s*(k)\b)?\s*(?:and|to|-)\s*৳?\s*(\d+)(?:\s*(k)\b)?").unwrap();
    static ref RANGE: Regex =
        Regex::new(r"৳?\b(\d+)(?:\s*(k)\b)?\s*(?:-|\bto\b)\s*৳?\s*(\d+)(?:\s*(k)\b)?").unwrap();
    static ref UNDER: Regex = Regex::new(
        r"\b(?:under|below|less than|within|upto|up to|max|maximum)\s*৳?\s*(\d+)(?:\s*(k)\b)?"
    )
    .unwrap();
    static ref ABOVE: Regex = Regex::new(
        r"\b(?:above|over|more than|at least|min|minimum|from)\s*৳?\s*(\d+)(?:\s*(k)\b)?"
    )
    .unwrap();
    static ref CURRENCY: Regex =
        Regex::new(r"৳\s*(\d+)(?:\s*(k)\b)?|\b(\d+)(?:\s*(k)\b)?\s*(?:tk|taka|bdt)\b").unwrap();
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Intent {
    pub wants_suggestion: bool,
    pub asks_quality: bool,
    pub asks_price: bool,
    pub asks_stock: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Budget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<Decimal>,
}

impl Budget {
    pub fn contains(&self, price: Decimal) -> bool {
        self.min.map_or(true, |min| price >= min) && self.max.map_or(true, |max| price <= max)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub id: Uuid,
    pub name: String,
    pub brand: Option<String>,
    pub category: Category,
    pub price: Decimal,
    pub discount: i32,
    pub effective_price: Decimal,
    pub stock: i32,
    pub image_url: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub suggestions: Vec<Suggestion>,
}

/// Lowercases and replaces everything but letters, digits, `৳` and `-` with spaces.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    NON_WORD
        .replace_all(&lowered, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn extract_keywords(text: &str) -> Vec<String> {
    let normalized = normalize(text);
    let mut seen = HashSet::new();
    normalized
        .split_whitespace()
        .map(|token| token.trim_matches('-'))
        .filter(|token| token.chars().count() >= 3)
        .filter(|token| !STOPWORDS.contains(token))
        .filter(|token| !BUDGET_FIGURE.is_match(token))
        .filter(|token| seen.insert(token.to_string()))
        .take(MAX_KEYWORDS)
        .map(str::to_string)
        .collect()
}

pub fn detect_intent(text: &str) -> Intent {
    let normalized = normalize(text);
    Intent {
        wants_suggestion: WANTS_SUGGESTION.is_match(&normalized),
        asks_quality: ASKS_QUALITY.is_match(&normalized),
        asks_price: ASKS_PRICE.is_match(&normalized),
        asks_stock: ASKS_STOCK.is_match(&normalized),
    }
}

/// Figures longer than this are not budgets.
const MAX_BUDGET_DIGITS: usize = 12;

fn amount(caps: &Captures<'_>, digits: usize, k: usize) -> Option<Decimal> {
    let figure = caps.get(digits)?.as_str();
    if figure.len() > MAX_BUDGET_DIGITS {
        return None;
    }
    let value: Decimal = figure.parse().ok()?;
    if caps.get(k).is_some() {
        value.checked_mul(Decimal::from(1000))
    } else {
        Some(value)
    }
}

fn range(caps: &Captures<'_>) -> Option<Budget> {
    let a = amount(caps, 1, 2)?;
    let b = amount(caps, 3, 4)?;
    let (min, max) = if a <= b { (a, b) } else { (b, a) };
    Some(Budget {
        min: Some(min),
        max: Some(max),
    })
}

/// First matching phrasing wins: ranges, then upper bounds, then lower
/// bounds, then a bare currency figure (treated as a ceiling).
pub fn parse_budget(text: &str) -> Option<Budget> {
    let normalized = normalize(text);

    if let Some(budget) = BETWEEN.captures(&normalized).and_then(|c| range(&c)) {
        return Some(budget);
    }
    if let Some(budget) = RANGE.captures(&normalized).and_then(|c| range(&c)) {
        return Some(budget);
    }
    if let Some(max) = UNDER.captures(&normalized).and_then(|c| amount(&c, 1, 2)) {
        return Some(Budget {
            min: None,
            max: Some(max),
        });
    }
    if let Some(min) = ABOVE.captures(&normalized).and_then(|c| amount(&c, 1, 2)) {
        return Some(Budget {
            min: Some(min),
            max: None,
        });
    }
    CURRENCY.captures(&normalized).and_then(|c| {
        amount(&c, 1, 2)
            .or_else(|| amount(&c, 3, 4))
            .map(|max| Budget {
                min: None,
                max: Some(max),
            })
    })
}

/// `round(price * (100 - discount) / 100)`, evaluated by the database.
fn effective_price_expr() -> SimpleExpr {
    Func::round(
        Expr::col(product::Column::Price)
            .mul(Expr::val(100).sub(Expr::col(product::Column::Discount)))
            .div(100),
    )
    .into()
}

fn budget_condition(budget: &Budget) -> Condition {
    let mut condition = Condition::all();
    if let Some(min) = budget.min.and_then(|min| min.to_f64()) {
        condition = condition.add(Expr::expr(effective_price_expr()).gte(min));
    }
    if let Some(max) = budget.max.and_then(|max| max.to_f64()) {
        condition = condition.add(Expr::expr(effective_price_expr()).lte(max));
    }
    condition
}

/// Active products matching any keyword and the budget, best first:
/// discount desc, stock desc, effective price asc, newest first.
pub fn candidates_query(keywords: &[String], budget: Option<&Budget>) -> Select<product::Entity> {
    let mut query = product::Entity::find().filter(product::Column::IsActive.eq(true));
    if !keywords.is_empty() {
        query = query.filter(keyword_condition(keywords));
    }
    if let Some(budget) = budget {
        query = query.filter(budget_condition(budget));
    }
    query
        .order_by_desc(product::Column::Discount)
        .order_by_desc(product::Column::Stock)
        .order_by_asc(effective_price_expr())
        .order_by_desc(product::Column::CreatedAt)
        .limit(MAX_SUGGESTIONS as u64)
}

fn matched_keyword<'k>(product: &product::Model, keywords: &'k [String]) -> Option<&'k str> {
    let haystack = format!(
        "{} {} {}",
        product.name,
        product.category,
        product.brand.as_deref().unwrap_or_default()
    )
    .to_lowercase();
    keywords
        .iter()
        .find(|k| haystack.contains(k.as_str()))
        .map(String::as_str)
}

pub fn build_reason(product: &product::Model, keywords: &[String], budget: Option<&Budget>) -> String {
    let mut parts = Vec::new();
    if product.discount > 0 {
        parts.push(format!("{}% off", product.discount));
    }
    if product.stock > 0 {
        parts.push(format!("In stock ({} left)", product.stock));
    } else {
        parts.push("Out of stock".to_string());
    }
    if budget.is_some_and(|b| b.contains(product.effective_price())) {
        parts.push("Within your budget".to_string());
    }
    if let Some(keyword) = matched_keyword(product, keywords) {
        parts.push(format!("Matches \"{}\"", keyword));
    }
    parts.join(" • ")
}

pub fn choose_reply(
    intent: &Intent,
    keywords: &[String],
    budget: Option<&Budget>,
    has_results: bool,
) -> String {
    if has_results {
        return if intent.asks_stock {
            "Here is the stock status of what I found:".to_string()
        } else if intent.asks_price && budget.is_some() {
            "Here are the best options within your budget:".to_string()
        } else if intent.asks_price {
            "Here are the current prices for what I found:".to_string()
        } else if intent.asks_quality {
            "These are well-reviewed picks with the best deals right now:".to_string()
        } else {
            "Here are some products you might like:".to_string()
        };
    }

    if budget.is_some() {
        "I couldn't find products in that price range. Try adjusting your budget.".to_string()
    } else if let Some(first) = keywords.first() {
        format!(
            "I couldn't find anything matching \"{}\". Try a different product or brand.",
            first
        )
    } else {
        "Tell me what you're looking for, for example \"a phone under 30000\".".to_string()
    }
}

fn to_suggestion(product: product::Model, keywords: &[String], budget: Option<&Budget>) -> Suggestion {
    let reason = build_reason(&product, keywords, budget);
    let effective_price = product.effective_price();
    Suggestion {
        id: product.id,
        name: product.name,
        brand: product.brand,
        category: product.category,
        price: product.price,
        discount: product.discount,
        effective_price,
        stock: product.stock,
        image_url: product.image_url,
        reason,
    }
}

#[derive(Clone)]
pub struct ChatService {
    db: Arc<DbPool>,
}

impl ChatService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    async fn candidates(
        &self,
        keywords: &[String],
        budget: Option<&Budget>,
    ) -> Result<Vec<product::Model>, ServiceError> {
        Ok(candidates_query(keywords, budget).all(&*self.db).await?)
    }

    #[instrument(skip(self, message), fields(len = message.len()))]
    pub async fn respond(
        &self,
        message: &str,
        context_product: Option<Uuid>,
    ) -> Result<ChatReply, ServiceError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ServiceError::ValidationError("Message is required".into()));
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ServiceError::ValidationError(format!(
                "Message must be at most {} characters",
                MAX_MESSAGE_CHARS
            )));
        }
        counter!("storefront_chat_queries_total", 1);

        let keywords = extract_keywords(message);
        let intent = detect_intent(message);
        let budget = parse_budget(message);
        debug!(?keywords, ?intent, ?budget, "chat message parsed");

        let mut products = if keywords.is_empty() && budget.is_none() {
            Vec::new()
        } else {
            self.candidates(&keywords, budget.as_ref()).await?
        };

        if let Some(product_id) = context_product {
            if let Some(context) = product::Entity::find_by_id(product_id)
                .one(&*self.db)
                .await?
            {
                products.retain(|p| p.id != context.id);
                products.insert(0, context);
                products.truncate(MAX_SUGGESTIONS);
            }
        }

        if products.is_empty() && intent.wants_suggestion {
            products = self.candidates(&[], None).await?;
        }

        let reply = choose_reply(&intent, &keywords, budget.as_ref(), !products.is_empty());
        let suggestions = products
            .into_iter()
            .map(|p| to_suggestion(p, &keywords, budget.as_ref()))
            .collect();

        Ok(ChatReply { reply, suggestions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use sea_orm::{DbBackend, QueryTrait};
    use proptest::prelude::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn budget(min: Option<Decimal>, max: Option<Decimal>) -> Option<Budget> {
        Some(Budget { min, max })
    }

    #[rstest]
    #[case("under 30000", budget(None, Some(dec!(30000))))]
    #[case("20k-30k", budget(Some(dec!(20000)), Some(dec!(30000))))]
    #[case("above ৳500", budget(Some(dec!(500)), None))]
    #[case("between 30k and 20k", budget(Some(dec!(20000)), Some(dec!(30000))))]
    #[case("phones from 15000 to 25000", budget(Some(dec!(15000)), Some(dec!(25000))))]
    #[case("less than 50k please", budget(None, Some(dec!(50000))))]
    #[case("at least 1000", budget(Some(dec!(1000)), None))]
    #[case("something for ৳45000", budget(None, Some(dec!(45000))))]
    #[case("a laptop around 60000 tk", budget(None, Some(dec!(60000))))]
    #[case("show me headphones", None)]
    #[case("hello there", None)]
    #[case("phone under 79228162514264337593543950335k", None)]
    #[case("between 1k and 99999999999999999999k", None)]
    fn parses_budget_phrasings(#[case] input: &str, #[case] expected: Option<Budget>) {
        assert_eq!(parse_budget(input), expected);
    }

    #[test]
    fn keywords_skip_stopwords_short_tokens_and_figures() {
        assert_eq!(
            extract_keywords("Please suggest a good phone under 30000"),
            vec!["phone".to_string()]
        );
        assert_eq!(
            extract_keywords("Samsung samsung Galaxy 20k-30k ৳500 tv"),
            vec!["samsung".to_string(), "galaxy".to_string()]
        );
    }

    #[test]
    fn keywords_are_capped() {
        let kws = extract_keywords("alpha bravo charlie delta echo foxtrot golf");
        assert_eq!(kws.len(), MAX_KEYWORDS);
        assert_eq!(kws[0], "alpha");
    }

    #[test]
    fn normalize_keeps_taka_sign_and_hyphen() {
        assert_eq!(normalize("Price?? ৳1,500 -- OK!"), "price ৳1 500 -- ok");
        assert_eq!(normalize("20K-30K"), "20k-30k");
    }

    #[test]
    fn intents_are_independent() {
        let intent = detect_intent("Can you suggest a good laptop? Is it in stock and what's the price?");
        assert_eq!(
            intent,
            Intent {
                wants_suggestion: true,
                asks_quality: true,
                asks_price: true,
                asks_stock: true,
            }
        );
        assert_eq!(detect_intent("iphone 15"), Intent::default());
    }

    fn model(name: &str, discount: i32, stock: i32, price: Decimal, age_days: i64) -> product::Model {
        let created = Utc::now() - Duration::days(age_days);
        product::Model {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            price,
            category: Category::Smartphone,
            image_url: None,
            stock,
            brand: Some("Acme".into()),
            discount,
            is_active: true,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn candidates_are_ranked_and_limited_in_sql() {
        let sql = candidates_query(
            &["phone".to_string()],
            Some(&Budget {
                min: None,
                max: Some(dec!(30000)),
            }),
        )
        .build(DbBackend::Sqlite)
        .to_string();

        let (filter, order) = sql.split_once("ORDER BY").unwrap();
        assert!(filter.contains(r#""products"."is_active""#));
        assert!(filter.contains("ROUND("));
        assert!(filter.contains("<= 30000"));

        let position = |needle: &str| order.find(needle).unwrap();
        assert!(position(r#""products"."discount" DESC"#) < position(r#""products"."stock" DESC"#));
        assert!(position(r#""products"."stock" DESC"#) < position("ROUND("));
        assert!(position("ROUND(") < position(r#""products"."created_at" DESC"#));
        assert!(order.trim_end().ends_with("LIMIT 5"));
    }

    #[test]
    fn reason_lists_every_applicable_part() {
        let product = model("Acme Phone X", 20, 12, dec!(25000), 0);
        let reason = build_reason(
            &product,
            &["phone".to_string()],
            Some(&Budget {
                min: None,
                max: Some(dec!(30000)),
            }),
        );
        assert_eq!(
            reason,
            "20% off • In stock (12 left) • Within your budget • Matches \"phone\""
        );

        let sold_out = model("Tab", 0, 0, dec!(100), 0);
        assert_eq!(build_reason(&sold_out, &[], None), "Out of stock");
    }

    #[test]
    fn reply_depends_on_results_and_budget() {
        let intent = Intent::default();
        assert!(choose_reply(&intent, &[], None, true).starts_with("Here are some products"));
        assert!(choose_reply(&intent, &[], Some(&Budget::default()), false).contains("price range"));
        assert!(choose_reply(&intent, &["drone".into()], None, false).contains("\"drone\""));
    }

    proptest! {
        #[test]
        fn parsed_ranges_are_ordered(a in 1u32..500, b in 1u32..500) {
            let parsed = parse_budget(&format!("between {}k and {}k", a, b)).unwrap();
            prop_assert!(parsed.min.unwrap() <= parsed.max.unwrap());
        }

        #[test]
        fn keywords_never_exceed_cap(words in proptest::collection::vec("[a-z]{1,8}", 0..20)) {
            let kws = extract_keywords(&words.join(" "));
            prop_assert!(kws.len() <= MAX_KEYWORDS);
            prop_assert!(kws.iter().all(|k| k.chars().count() >= 3));
        }
    }
}

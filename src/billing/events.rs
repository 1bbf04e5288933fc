use serde::Deserialize;

/// Tag the engine puts on orders it creates for manually billed renewals.
pub const MANUAL_RECURRING_TAG: &str = "manual_subscription_recurring_order";

/// Tag the platform's subscription app puts on the renewals it bills itself. The original
/// order reference follows the tag, separated by `-` or `_`.
pub const PLATFORM_RECURRING_TAG: &str = "appstle_subscription_recurring_order";

/// First orders carrying this marker open a subscription whose later cycles the engine bills
/// itself. Orders without it are one-off purchases.
pub const SUBSCRIPTION_MARKER: &str = "appstle_subscription";

/// key: order-lifecycle-event -> verified webhook payload
#[derive(Debug, Clone, Deserialize)]
pub struct OrderEvent {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub financial_status: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub customer: Customer,
    #[serde(default)]
    pub current_total_price_set: PriceSet,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub variant_id: Option<i64>,
    #[serde(default)]
    pub quantity: i32,
    #[serde(default)]
    pub price: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Customer {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub default_address: Option<Address>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PriceSet {
    #[serde(default)]
    pub shop_money: Money,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Money {
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub currency_code: Option<String>,
}

impl OrderEvent {
    pub fn order_ref(&self) -> String {
        self.id.to_string()
    }

    pub fn total_amount(&self) -> &str {
        self.current_total_price_set.shop_money.amount.as_str()
    }

    pub fn kind(&self) -> OrderKind {
        classify_tags(&self.tags)
    }
}

impl Customer {
    pub fn remote_ref(&self) -> String {
        self.id.to_string()
    }

    pub fn display_name(&self) -> String {
        let first = self.first_name.as_deref().unwrap_or("").trim();
        let last = self.last_name.as_deref().unwrap_or("").trim();
        format!("{first} {last}").trim().to_string()
    }

    pub fn email(&self) -> &str {
        self.email.as_deref().unwrap_or("")
    }

    pub fn phone(&self) -> Option<String> {
        self.default_address
            .as_ref()
            .and_then(|address| address.phone.clone())
            .filter(|phone| !phone.trim().is_empty())
    }

    pub fn city(&self) -> Option<String> {
        self.default_address
            .as_ref()
            .and_then(|address| address.city.clone())
            .filter(|city| !city.trim().is_empty())
    }
}

/// Which provisioning path an "order created" event takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderKind {
    /// Created by the cycle scheduler; already reconciled when it was created.
    ManualRenewal,
    /// Renewal billed by the platform. `None` when the original order reference is missing.
    PlatformRenewal { original_order_ref: Option<String> },
    FirstOrder { manual_billing: bool },
}

pub fn classify_tags(raw: &str) -> OrderKind {
    let tags: Vec<String> = split_tags(raw).map(|tag| tag.to_ascii_lowercase()).collect();

    if tags.iter().any(|tag| tag.contains(MANUAL_RECURRING_TAG)) {
        return OrderKind::ManualRenewal;
    }

    let mut renewal_tags = tags
        .iter()
        .filter(|tag| tag.starts_with(PLATFORM_RECURRING_TAG))
        .peekable();
    if renewal_tags.peek().is_some() {
        let original_order_ref = renewal_tags.find_map(|tag| original_order_ref(tag));
        return OrderKind::PlatformRenewal { original_order_ref };
    }

    OrderKind::FirstOrder {
        manual_billing: tags.iter().any(|tag| tag.contains(SUBSCRIPTION_MARKER)),
    }
}

fn split_tags(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|tag| !tag.is_empty())
}

fn original_order_ref(tag: &str) -> Option<String> {
    let suffix = tag
        .strip_prefix(PLATFORM_RECURRING_TAG)?
        .trim_start_matches(&['-', '_'][..]);
    if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
        Some(suffix.to_string())
    } else {
        None
    }
}

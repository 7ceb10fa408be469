use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which physical table an order lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// E-commerce / funnel orders.
    Product,
    Subscription,
}

impl OrderKind {
    /// Lookup order used when resolving an order number.
    pub const LOOKUP_ORDER: [OrderKind; 2] = [OrderKind::Product, OrderKind::Subscription];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Subscription => "subscription",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Self::Product => "product_orders",
            Self::Subscription => "subscription_orders",
        }
    }
}

impl std::str::FromStr for OrderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product" => Ok(Self::Product),
            "subscription" => Ok(Self::Subscription),
            _ => Err(format!("unknown order kind: {}", s)),
        }
    }
}

/// Order lifecycle. `Paid` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Paid,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Paid => "paid",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Failed)
    }

    /// Payment status column value that accompanies this order status.
    pub fn payment_status(&self) -> PaymentStatus {
        match self {
            Self::Pending => PaymentStatus::Unpaid,
            Self::Processing => PaymentStatus::Pending,
            Self::Paid => PaymentStatus::Paid,
            Self::Failed => PaymentStatus::Failed,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown order status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(Self::Unpaid),
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown payment status: {}", s)),
        }
    }
}

/// Which notification path delivered a payment outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentChannel {
    /// Server-to-server webhook.
    Callback,
    /// User's browser redirected back from the gateway.
    Return,
}

impl PaymentChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Callback => "callback",
            Self::Return => "return",
        }
    }

    /// Source tag recorded on `payment_completed` session events.
    pub fn event_source(&self) -> &'static str {
        match self {
            Self::Callback => "callback_endpoint",
            Self::Return => "return_endpoint",
        }
    }
}

impl std::str::FromStr for PaymentChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "callback" => Ok(Self::Callback),
            "return" => Ok(Self::Return),
            _ => Err(format!("unknown payment channel: {}", s)),
        }
    }
}

/// Funnel linkage carried on an order. Unknown keys are preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funnel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funnel_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_uuid: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OrderMetadata {
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// Metadata key under which the server-side pixel event id is cached.
pub const PIXEL_EVENT_ID_KEY: &str = "pixel_purchase_event_id";
/// Metadata key under which the gateway payment intent id is stored.
pub const PAYMENT_INTENT_KEY: &str = "payment_intent_id";

/// Row shape shared by `product_orders` and `subscription_orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub order_number: String,
    pub transaction_id: Option<String>,
    pub total_cents: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_channel: Option<PaymentChannel>,
    pub metadata: OrderMetadata,
    /// Flipped false -> true exactly once, by a conditional update.
    pub conversion_tracked: bool,
    pub email: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub paid_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrder {
    pub order_number: String,
    pub total_cents: i64,
    pub currency: String,
    pub metadata: OrderMetadata,
    #[serde(default)]
    pub email: Option<String>,
}

/// An order from either table.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "order", rename_all = "snake_case")]
pub enum OrderRef {
    Commerce(Order),
    Subscription(Order),
}

impl OrderRef {
    pub fn new(kind: OrderKind, order: Order) -> Self {
        match kind {
            OrderKind::Product => Self::Commerce(order),
            OrderKind::Subscription => Self::Subscription(order),
        }
    }

    pub fn order(&self) -> &Order {
        match self {
            Self::Commerce(o) | Self::Subscription(o) => o,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            Self::Commerce(o) | Self::Subscription(o) => o,
        }
    }
}

/// Fields the reconciler and collaborators need from any order.
pub trait PaymentRecord: Send + Sync {
    fn kind(&self) -> OrderKind;
    fn id(&self) -> &str;
    fn order_number(&self) -> &str;
    fn status(&self) -> OrderStatus;
    fn transaction_id(&self) -> Option<&str>;
    fn total_cents(&self) -> i64;
    fn currency(&self) -> &str;
    fn metadata(&self) -> &OrderMetadata;
    fn email(&self) -> Option<&str>;
}

impl PaymentRecord for OrderRef {
    fn kind(&self) -> OrderKind {
        match self {
            Self::Commerce(_) => OrderKind::Product,
            Self::Subscription(_) => OrderKind::Subscription,
        }
    }

    fn id(&self) -> &str {
        &self.order().id
    }

    fn order_number(&self) -> &str {
        &self.order().order_number
    }

    fn status(&self) -> OrderStatus {
        self.order().status
    }

    fn transaction_id(&self) -> Option<&str> {
        self.order().transaction_id.as_deref()
    }

    fn total_cents(&self) -> i64 {
        self.order().total_cents
    }

    fn currency(&self) -> &str {
        &self.order().currency
    }

    fn metadata(&self) -> &OrderMetadata {
        &self.order().metadata
    }

    fn email(&self) -> Option<&str> {
        self.order().email.as_deref()
    }
}

/// Join of order, funnel, step and session with denormalized revenue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelOrder {
    pub id: String,
    pub funnel_id: String,
    pub step_id: Option<String>,
    pub session_uuid: Option<String>,
    pub order_kind: OrderKind,
    pub order_id: String,
    pub order_number: String,
    pub revenue_cents: i64,
    pub affiliate_id: Option<String>,
    pub created_at: i64,
}

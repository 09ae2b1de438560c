use std::collections::HashMap;

use async_trait::async_trait;
use parley_messenger::payload::{ReceiptAddress, ReceiptBuilder, ReceiptTemplate};
use rust_decimal::Decimal;

/// Order lookup used by `sendOrderInfo`.
#[async_trait]
pub trait OrderBook: Send + Sync {
    async fn receipt(&self, order_number: &str) -> Option<ReceiptTemplate>;
}

/// Fixed in-process order book. In demo mode every lookup answers with the
/// sample receipt, re-labelled with the requested order number.
#[derive(Clone, Debug, Default)]
pub struct InMemoryOrderBook {
    receipts: HashMap<String, ReceiptTemplate>,
    demo: Option<ReceiptTemplate>,
}

impl InMemoryOrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn demo() -> Self {
        Self { receipts: HashMap::new(), demo: Some(sample_receipt()) }
    }

    pub fn with_receipt(mut self, receipt: ReceiptTemplate) -> Self {
        self.receipts.insert(receipt.order_number.clone(), receipt);
        self
    }

    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }
}

#[async_trait]
impl OrderBook for InMemoryOrderBook {
    async fn receipt(&self, order_number: &str) -> Option<ReceiptTemplate> {
        if let Some(receipt) = self.receipts.get(order_number) {
            return Some(receipt.clone());
        }

        self.demo.as_ref().map(|template| ReceiptTemplate {
            order_number: order_number.to_owned(),
            ..template.clone()
        })
    }
}

pub fn sample_receipt() -> ReceiptTemplate {
    ReceiptBuilder::new("Stephane Crozatier", "12345678902", "SGD", "Visa 2345")
        .order_url("http://petersapparel.parseapp.com/order?order_id=123456")
        .timestamp(1_428_444_852)
        .element("Floral Crochet Bodycon Dress", Decimal::new(17_980, 2), |item| {
            item.subtitle("Verification pending")
                .quantity(2)
                .currency("SGD")
                .image_url("http://static-sg.zacdn.com/p/topshop-0274-965084-1.jpg");
        })
        .element("Tie Collar Polka Dot Sleeveless Dress", Decimal::new(3_990, 2), |item| {
            item.subtitle("Verification pending")
                .currency("SGD")
                .image_url("http://static-sg.zacdn.com/p/mayuki-9107-254854-1.jpg");
        })
        .address(ReceiptAddress {
            street_1: "1 Hacker Way".to_owned(),
            street_2: String::new(),
            city: "Menlo Park".to_owned(),
            postal_code: "94025".to_owned(),
            state: "CA".to_owned(),
            country: "US".to_owned(),
        })
        .summary(Decimal::new(20_084, 2), |summary| {
            summary
                .subtotal(Decimal::new(12_980, 2))
                .shipping_cost(Decimal::new(495, 2))
                .total_tax(Decimal::new(619, 2));
        })
        .adjustment("New Customer Discount", Decimal::from(20))
        .adjustment("$10 Off Coupon", Decimal::from(10))
        .build()
}

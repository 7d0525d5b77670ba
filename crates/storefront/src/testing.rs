//! Test support: an in-memory ElectroKart backend.
//!
//! - [`MockShop`] is a synchronous model of the REST API (json-server style)
//!   with switchable faults. The integration-test server wraps the same type.
//! - [`FakeBackend`] plugs a `MockShop` in as a [`Transport`], recording
//!   every request so tests can assert on what was (not) sent.
//! - [`ScriptedWidget`] stands in for the payment provider's widget.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, StatusCode};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::warn;

use electrokart_core::{
    CartLineId, Email, OrderId, OrderStatus, PaymentMethod, ProductId, Role, UserId,
    WishlistEntryId,
};

use crate::gateway::{Gateway, HttpRequest, HttpResponse, Transport, TransportError};
use crate::models::{
    CartLine, Identity, Order, OrderItem, Product, ProductRef, Session, UserSummary,
    WishlistEntry,
};
use crate::services::{PaymentWidget, ProviderPayment, WidgetOptions, WidgetOutcome};
use crate::session::SessionStore;
use crate::state::{Storefront, StorefrontOptions};
use crate::storage::{MemoryStorage, Storage, keys};

/// Password given to users created by [`FakeBackend::sign_in`].
pub const DEFAULT_PASSWORD: &str = "secret1";

// =============================================================================
// MockShop
// =============================================================================

/// A response from [`MockShop::handle`].
#[derive(Debug, Clone, PartialEq)]
pub struct MockReply {
    pub status: u16,
    pub body: Option<Value>,
    /// New value of the refresh-token cookie. Empty clears it.
    pub set_cookie: Option<String>,
}

impl MockReply {
    fn ok(data: Value) -> Self {
        Self::json(200, json!({ "success": true, "data": data }))
    }

    fn done(message: &str) -> Self {
        Self::json(200, json!({ "success": true, "message": message }))
    }

    fn fail(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, json!({ "success": false, "message": message.into() }))
    }

    const fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: Some(body),
            set_cookie: None,
        }
    }

    fn with_cookie(mut self, value: impl Into<String>) -> Self {
        self.set_cookie = Some(value.into());
        self
    }
}

/// Switchable misbehavior.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// `/Auth/Refresh` answers 401.
    pub refresh_fails: bool,
    /// `/Payments/initiate` refuses.
    pub initiate_fails: bool,
    /// `/Payments/confirm` answers `success: false`.
    pub confirm_fails: bool,
    /// Checkout responses leave out `orderId`.
    pub omit_order_id: bool,
    /// Checkout responses leave out `totalAmount`.
    pub omit_order_total: bool,
    /// One-shot statuses per path, consumed in order.
    forced: Vec<(String, u16)>,
}

#[derive(Debug, Clone)]
struct MockUser {
    id: UserId,
    username: String,
    email: String,
    password: String,
    role: Role,
}

#[derive(Debug, Clone)]
struct StoredLine {
    id: CartLineId,
    product_id: ProductId,
    quantity: u32,
}

#[derive(Debug, Clone)]
struct StoredOrder {
    owner: UserId,
    order: Order,
}

/// In-memory ElectroKart backend.
#[derive(Debug, Default)]
pub struct MockShop {
    products: Vec<Product>,
    users: Vec<MockUser>,
    access_tokens: HashMap<String, UserId>,
    refresh_tokens: HashMap<String, UserId>,
    carts: HashMap<UserId, Vec<StoredLine>>,
    wishlists: HashMap<UserId, Vec<(WishlistEntryId, ProductId)>>,
    orders: Vec<StoredOrder>,
    /// Provider order id -> order.
    payments: HashMap<String, OrderId>,
    faults: Faults,
    next_id: i32,
    tokens_issued: u32,
}

impl MockShop {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A shop with a small electronics catalog. Product ids 7, 42, 100 and 101.
    #[must_use]
    pub fn with_catalog() -> Self {
        let mut shop = Self::new();
        shop.add_product(7, "Earbuds", Decimal::new(2_499_00, 2), "Audio");
        shop.add_product(42, "Phone", Decimal::new(14_999_00, 2), "Mobiles");
        shop.add_product(100, "Smart Bulb", Decimal::new(899_50, 2), "Smart Home");
        shop.add_product(101, "Smart Plug", Decimal::new(1_299_00, 2), "Smart Home");
        shop
    }

    pub fn add_product(&mut self, id: i32, name: &str, price: Decimal, category: &str) {
        self.products.push(Product {
            id: ProductId::new(id),
            name: name.to_string(),
            description: Some(format!("{name} by ElectroKart")),
            price,
            category: Some(category.to_string()),
            brand: Some("ElectroKart".to_string()),
            image_url: Some(format!("/images/{id}.png")),
            stock: Some(25),
        });
    }

    /// Register an account directly, bypassing the API.
    pub fn add_user(&mut self, username: &str, email: &str, password: &str, role: Role) -> UserId {
        let id = UserId::new(self.next_id());
        self.users.push(MockUser {
            id,
            username: username.to_string(),
            email: email.trim().to_ascii_lowercase(),
            password: password.to_string(),
            role,
        });
        id
    }

    #[must_use]
    pub fn user_id(&self, email: &str) -> Option<UserId> {
        let email = email.trim().to_ascii_lowercase();
        self.users.iter().find(|u| u.email == email).map(|u| u.id)
    }

    /// Mint an access token and a refresh token for `user`.
    pub fn issue_tokens(&mut self, user: UserId) -> (String, String) {
        self.tokens_issued += 1;
        let access = format!("tok{}", self.tokens_issued);
        let refresh = format!("rt{}", self.tokens_issued);
        self.access_tokens.insert(access.clone(), user);
        self.refresh_tokens.insert(refresh.clone(), user);
        (access, refresh)
    }

    /// Invalidate every access token; refresh tokens keep working.
    pub fn expire_access_tokens(&mut self) {
        self.access_tokens.clear();
    }

    pub const fn faults(&mut self) -> &mut Faults {
        &mut self.faults
    }

    /// Answer the next request to `path` with `status`.
    pub fn force(&mut self, path: &str, status: u16) {
        self.faults.forced.push((path.to_string(), status));
    }

    #[must_use]
    pub fn order_status(&self, id: OrderId) -> Option<OrderStatus> {
        self.orders
            .iter()
            .find(|o| o.order.order_id == id)
            .map(|o| o.order.status)
    }

    #[must_use]
    pub fn orders_for(&self, email: &str) -> Vec<Order> {
        let Some(owner) = self.user_id(email) else {
            return Vec::new();
        };
        self.orders
            .iter()
            .filter(|o| o.owner == owner)
            .map(|o| o.order.clone())
            .collect()
    }

    /// Create a one-item order for an existing user, bypassing the API.
    ///
    /// # Panics
    ///
    /// Panics if the user or the catalog is missing.
    pub fn seed_order(&mut self, email: &str, payment_method: PaymentMethod) -> OrderId {
        let Some(owner) = self.user_id(email) else {
            panic!("seed_order: unknown user {email}");
        };
        let Some(product) = self.products.first().cloned() else {
            panic!("seed_order: empty catalog");
        };
        self.create_order(owner, "1 Test Street".to_string(), payment_method, vec![(product, 1)])
    }

    /// Dispatch one request.
    pub fn handle(
        &mut self,
        method: &Method,
        path: &str,
        bearer: Option<&str>,
        body: Option<&Value>,
    ) -> MockReply {
        let path = path.split('?').next().unwrap_or_default();
        if let Some(index) = self
            .faults
            .forced
            .iter()
            .position(|(p, _)| p.eq_ignore_ascii_case(path))
        {
            let (_, status) = self.faults.forced.remove(index);
            return MockReply::fail(status, "Injected failure");
        }

        let raw: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let lower: Vec<String> = raw.iter().map(|s| s.to_ascii_lowercase()).collect();
        let segments: Vec<&str> = lower.iter().map(String::as_str).collect();

        match (method.as_str(), segments.as_slice()) {
            ("POST", ["auth", "register"]) => self.register(body),
            ("POST", ["auth", "login"]) => self.login(body),
            ("POST", ["auth", "logout"]) => self.logout(bearer),
            ("POST", ["auth", "refresh"]) => self.refresh(body),
            ("GET", ["products"]) => MockReply::ok(json!(self.products)),
            ("GET", ["products", "category", _]) => {
                let category = raw
                    .get(2)
                    .map(|c| urlencoding::decode(c).map(|c| c.into_owned()).unwrap_or_default())
                    .unwrap_or_default();
                let matching: Vec<&Product> = self
                    .products
                    .iter()
                    .filter(|p| {
                        p.category
                            .as_deref()
                            .is_some_and(|c| c.eq_ignore_ascii_case(&category))
                    })
                    .collect();
                MockReply::ok(json!(matching))
            }
            ("GET", ["products", id]) => match id.parse().ok().and_then(|id| self.product(id)) {
                Some(product) => MockReply::ok(json!(product)),
                None => MockReply::fail(404, "Product not found"),
            },
            _ => match self.authenticate(bearer) {
                Ok(user) => self.protected(method.as_str(), &segments, user, body),
                Err(reply) => reply,
            },
        }
    }

    fn protected(
        &mut self,
        method: &str,
        segments: &[&str],
        user: UserId,
        body: Option<&Value>,
    ) -> MockReply {
        match (method, segments) {
            ("GET", ["cart"]) => self.cart(user),
            ("POST", ["cart", "add"]) => self.cart_add(user, body),
            ("PUT", ["cart", "update", id]) => self.cart_update(user, id, body),
            ("DELETE", ["cart", "remove", id]) => self.cart_remove(user, id),
            ("DELETE", ["cart", "clear"]) => {
                self.carts.remove(&user);
                MockReply::done("Cart cleared")
            }
            ("GET", ["wishlist"]) => self.wishlist(user),
            ("POST", ["wishlist", "add"]) => self.wishlist_add(user, body),
            ("DELETE", ["wishlist", "remove", id]) => self.wishlist_remove(user, id),
            ("DELETE", ["wishlist", "clear"]) => {
                self.wishlists.remove(&user);
                MockReply::done("Wishlist cleared")
            }
            ("POST", ["orders", "checkout"]) => self.checkout(user, body),
            ("GET", ["orders", "my-orders"]) => {
                let mine: Vec<&Order> = self
                    .orders
                    .iter()
                    .filter(|o| o.owner == user)
                    .map(|o| &o.order)
                    .collect();
                MockReply::ok(json!(mine))
            }
            ("POST", ["payments", "initiate"]) => self.initiate(user, body),
            ("POST", ["payments", "confirm"]) => self.confirm(user, body),
            (_, ["admin", ..] | ["orders", "all-orders"] | ["orders", _, "status"]) => {
                if self.role(user) != Some(Role::Admin) {
                    return MockReply::fail(403, "Admin access required");
                }
                self.admin(method, segments, body)
            }
            _ => MockReply::fail(404, "Not found"),
        }
    }

    // -------------------------------------------------------------------------
    // Auth
    // -------------------------------------------------------------------------

    fn register(&mut self, body: Option<&Value>) -> MockReply {
        let username = text(body, "username");
        let email = text(body, "email");
        let password = text(body, "password");
        let (Some(username), Some(email), Some(password)) = (username, email, password) else {
            return MockReply::fail(400, "Username, email and password are required");
        };
        if self.user_id(&email).is_some() {
            return MockReply::fail(409, "User with this email already exists");
        }
        self.add_user(&username, &email, &password, Role::Customer);
        MockReply::done("Registration successful")
    }

    fn login(&mut self, body: Option<&Value>) -> MockReply {
        let email = text(body, "email").unwrap_or_default().to_ascii_lowercase();
        let password = text(body, "password").unwrap_or_default();
        let Some(user) = self
            .users
            .iter()
            .find(|u| u.email == email && u.password == password)
            .cloned()
        else {
            return MockReply::fail(401, "Invalid email or password");
        };

        let (access, refresh) = self.issue_tokens(user.id);
        MockReply::ok(json!({
            "username": user.username,
            "email": user.email,
            "role": user.role,
            "accessToken": access,
        }))
        .with_cookie(refresh)
    }

    fn logout(&mut self, bearer: Option<&str>) -> MockReply {
        if let Some(token) = bearer {
            self.access_tokens.remove(token);
        }
        MockReply::done("Logged out").with_cookie("")
    }

    fn refresh(&mut self, body: Option<&Value>) -> MockReply {
        if self.faults.refresh_fails {
            return MockReply::fail(401, "Refresh token expired");
        }
        let refresh = text(body, "refreshToken").unwrap_or_default();
        let Some(user) = self.refresh_tokens.get(&refresh).copied() else {
            return MockReply::fail(401, "Invalid refresh token");
        };

        self.tokens_issued += 1;
        let access = format!("tok{}", self.tokens_issued);
        self.access_tokens.insert(access.clone(), user);
        MockReply::ok(json!({ "accessToken": access }))
    }

    fn authenticate(&self, bearer: Option<&str>) -> Result<UserId, MockReply> {
        bearer
            .and_then(|token| self.access_tokens.get(token).copied())
            .ok_or_else(|| MockReply::json(401, json!({ "message": "Unauthorized" })))
    }

    fn role(&self, user: UserId) -> Option<Role> {
        self.users.iter().find(|u| u.id == user).map(|u| u.role)
    }

    // -------------------------------------------------------------------------
    // Cart & wishlist
    // -------------------------------------------------------------------------

    fn product(&self, id: ProductId) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    fn cart(&self, user: UserId) -> MockReply {
        let lines: Vec<CartLine> = self
            .carts
            .get(&user)
            .into_iter()
            .flatten()
            .filter_map(|line| {
                self.product(line.product_id).map(|product| CartLine {
                    id: line.id,
                    product: ProductRef::from(product),
                    quantity: line.quantity,
                })
            })
            .collect();
        let total: Decimal = lines.iter().map(CartLine::line_total).sum();
        MockReply::ok(json!({ "items": lines, "totalAmount": total }))
    }

    fn cart_add(&mut self, user: UserId, body: Option<&Value>) -> MockReply {
        let Some(product_id) = parse::<ProductId>(body, "productId") else {
            return MockReply::fail(400, "productId is required");
        };
        let quantity = parse::<u32>(body, "quantity").unwrap_or(1);
        if quantity == 0 {
            return MockReply::fail(400, "Quantity must be at least 1");
        }
        if self.product(product_id).is_none() {
            return MockReply::fail(404, format!("Product {product_id} not found"));
        }
        if self
            .carts
            .get(&user)
            .is_some_and(|lines| lines.iter().any(|l| l.product_id == product_id))
        {
            return MockReply::fail(400, "Product already in cart");
        }

        let id = CartLineId::new(self.next_id());
        self.carts.entry(user).or_default().push(StoredLine {
            id,
            product_id,
            quantity,
        });
        MockReply::done("Item added to cart")
    }

    fn cart_update(&mut self, user: UserId, id: &str, body: Option<&Value>) -> MockReply {
        let quantity = parse::<u32>(body, "quantity").unwrap_or(0);
        if quantity == 0 {
            return MockReply::fail(400, "Quantity must be at least 1");
        }
        let line = id.parse::<CartLineId>().ok().and_then(|id| {
            self.carts
                .get_mut(&user)
                .and_then(|lines| lines.iter_mut().find(|l| l.id == id))
        });
        match line {
            Some(line) => {
                line.quantity = quantity;
                MockReply::done("Cart updated")
            }
            None => MockReply::fail(404, "Cart item not found"),
        }
    }

    fn cart_remove(&mut self, user: UserId, id: &str) -> MockReply {
        let Ok(id) = id.parse::<CartLineId>() else {
            return MockReply::fail(400, "Invalid cart item id");
        };
        let lines = self.carts.entry(user).or_default();
        let before = lines.len();
        lines.retain(|l| l.id != id);
        if lines.len() == before {
            MockReply::fail(404, "Cart item not found")
        } else {
            MockReply::done("Item removed")
        }
    }

    fn wishlist(&self, user: UserId) -> MockReply {
        let entries: Vec<WishlistEntry> = self
            .wishlists
            .get(&user)
            .into_iter()
            .flatten()
            .filter_map(|(id, product_id)| {
                self.product(*product_id).map(|product| WishlistEntry {
                    id: *id,
                    product: ProductRef::from(product),
                })
            })
            .collect();
        MockReply::ok(json!(entries))
    }

    fn wishlist_add(&mut self, user: UserId, body: Option<&Value>) -> MockReply {
        let Some(product_id) = parse::<ProductId>(body, "productId") else {
            return MockReply::fail(400, "productId is required");
        };
        if self.product(product_id).is_none() {
            return MockReply::fail(404, format!("Product {product_id} not found"));
        }
        if self
            .wishlists
            .get(&user)
            .is_some_and(|list| list.iter().any(|(_, p)| *p == product_id))
        {
            return MockReply::fail(400, "Product already in wishlist");
        }
        let id = WishlistEntryId::new(self.next_id());
        self.wishlists
            .entry(user)
            .or_default()
            .push((id, product_id));
        MockReply::done("Added to wishlist")
    }

    fn wishlist_remove(&mut self, user: UserId, product: &str) -> MockReply {
        let Ok(product_id) = product.parse::<ProductId>() else {
            return MockReply::fail(400, "Invalid product id");
        };
        let list = self.wishlists.entry(user).or_default();
        let before = list.len();
        list.retain(|(_, p)| *p != product_id);
        if list.len() == before {
            MockReply::fail(404, "Product not in wishlist")
        } else {
            MockReply::done("Removed from wishlist")
        }
    }

    // -------------------------------------------------------------------------
    // Orders & payments
    // -------------------------------------------------------------------------

    fn checkout(&mut self, user: UserId, body: Option<&Value>) -> MockReply {
        let address = text(body, "shippingAddress").unwrap_or_default();
        if address.trim().is_empty() {
            return MockReply::fail(400, "Shipping address is required");
        }
        let Some(payment_method) = parse::<PaymentMethod>(body, "paymentMethod") else {
            return MockReply::fail(400, "Invalid payment method");
        };
        let items = body
            .and_then(|b| b.get("items"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if items.is_empty() {
            return MockReply::fail(400, "Order must contain at least one item");
        }

        let mut lines = Vec::with_capacity(items.len());
        for item in &items {
            let product = parse::<ProductId>(Some(item), "productId")
                .and_then(|id| self.product(id).cloned());
            let Some(product) = product else {
                let id = item.get("productId").map(Value::to_string).unwrap_or_default();
                return MockReply::fail(400, format!("Product {id} not found"));
            };
            let quantity = parse::<u32>(Some(item), "quantity").unwrap_or(0);
            if quantity == 0 {
                return MockReply::fail(400, "Quantity must be at least 1");
            }
            lines.push((product, quantity));
        }

        let order_id = self.create_order(user, address, payment_method, lines);
        let total = self
            .orders
            .iter()
            .find(|o| o.order.order_id == order_id)
            .and_then(|o| o.order.total_amount);

        let mut data = serde_json::Map::new();
        if !self.faults.omit_order_id {
            data.insert("orderId".to_string(), json!(order_id));
        }
        if !self.faults.omit_order_total {
            data.insert("totalAmount".to_string(), json!(total));
        }
        let mut reply = MockReply::ok(Value::Object(data));
        if let Some(body) = reply.body.as_mut() {
            body["message"] = json!("Order placed successfully");
        }
        reply
    }

    fn create_order(
        &mut self,
        owner: UserId,
        shipping_address: String,
        payment_method: PaymentMethod,
        lines: Vec<(Product, u32)>,
    ) -> OrderId {
        let order_id = OrderId::new(self.next_id());
        let items: Vec<OrderItem> = lines
            .into_iter()
            .map(|(product, quantity)| OrderItem {
                product_id: product.id,
                product_name: Some(product.name),
                quantity,
                unit_price: product.price,
            })
            .collect();
        let total = items
            .iter()
            .map(|i| i.unit_price * Decimal::from(i.quantity))
            .sum();
        self.orders.push(StoredOrder {
            owner,
            order: Order {
                order_id,
                items,
                shipping_address,
                payment_method,
                status: OrderStatus::Pending,
                total_amount: Some(total),
                created_at: Utc::now(),
            },
        });
        order_id
    }

    fn initiate(&mut self, user: UserId, body: Option<&Value>) -> MockReply {
        if self.faults.initiate_fails {
            return MockReply::fail(400, "Payment gateway unavailable");
        }
        let Some(order_id) = parse::<OrderId>(body, "orderId") else {
            return MockReply::fail(400, "orderId is required");
        };
        if !self
            .orders
            .iter()
            .any(|o| o.owner == user && o.order.order_id == order_id)
        {
            return MockReply::fail(404, "Order not found");
        }
        let Some(amount) = parse::<Decimal>(body, "amount") else {
            return MockReply::fail(400, "amount is required");
        };

        let provider_order_id = format!("order_mock_{order_id}_{}", self.next_id());
        self.payments.insert(provider_order_id.clone(), order_id);
        let minor = (amount * Decimal::from(100)).round();
        MockReply::ok(json!({
            "razorpayOrderId": provider_order_id,
            "keyId": "rzp_test_mock",
            "amount": minor.to_i64(),
            "currency": text(body, "currency").unwrap_or_else(|| "INR".to_string()),
        }))
    }

    fn confirm(&mut self, user: UserId, body: Option<&Value>) -> MockReply {
        if self.faults.confirm_fails {
            return MockReply::json(
                200,
                json!({ "success": false, "message": "Payment verification failed" }),
            );
        }
        let provider_order = text(body, "providerOrderId").unwrap_or_default();
        let signature = text(body, "signature").unwrap_or_default();
        let order_id = parse::<OrderId>(body, "orderId");

        let valid = self.payments.get(&provider_order).copied() == order_id
            && signature == format!("sig_{provider_order}");
        if !valid {
            return MockReply::fail(400, "Invalid payment signature");
        }

        let Some(stored) = self
            .orders
            .iter_mut()
            .find(|o| o.owner == user && Some(o.order.order_id) == order_id)
        else {
            return MockReply::fail(404, "Order not found");
        };
        stored.order.status = OrderStatus::Processing;
        MockReply::done("Payment verified")
    }

    // -------------------------------------------------------------------------
    // Admin
    // -------------------------------------------------------------------------

    fn admin(&mut self, method: &str, segments: &[&str], body: Option<&Value>) -> MockReply {
        match (method, segments) {
            ("GET", ["admin", "users"]) => {
                let users: Vec<UserSummary> = self
                    .users
                    .iter()
                    .map(|u| UserSummary {
                        id: u.id,
                        username: u.username.clone(),
                        email: u.email.clone(),
                        role: u.role,
                        created_at: None,
                    })
                    .collect();
                MockReply::ok(json!(users))
            }
            ("PUT", ["admin", "users", id]) => {
                let Some(role) = parse::<Role>(body, "role") else {
                    return MockReply::fail(400, "Invalid role");
                };
                let user = id
                    .parse::<UserId>()
                    .ok()
                    .and_then(|id| self.users.iter_mut().find(|u| u.id == id));
                match user {
                    Some(user) => {
                        user.role = role;
                        MockReply::done("User updated")
                    }
                    None => MockReply::fail(404, "User not found"),
                }
            }
            ("DELETE", ["admin", "users", id]) => {
                let Ok(id) = id.parse::<UserId>() else {
                    return MockReply::fail(400, "Invalid user id");
                };
                let before = self.users.len();
                self.users.retain(|u| u.id != id);
                if self.users.len() == before {
                    return MockReply::fail(404, "User not found");
                }
                self.access_tokens.retain(|_, user| *user != id);
                self.refresh_tokens.retain(|_, user| *user != id);
                MockReply::done("User deleted")
            }
            ("GET", ["orders", "all-orders"]) => {
                let all: Vec<&Order> = self.orders.iter().map(|o| &o.order).collect();
                MockReply::ok(json!(all))
            }
            ("PATCH", ["orders", id, "status"]) => {
                let Some(status) = parse::<OrderStatus>(body, "status") else {
                    return MockReply::fail(400, "Invalid status");
                };
                let order = id.parse::<OrderId>().ok().and_then(|id| {
                    self.orders
                        .iter_mut()
                        .find(|o| o.order.order_id == id)
                });
                match order {
                    Some(stored) => {
                        stored.order.status = status;
                        MockReply::done("Order status updated")
                    }
                    None => MockReply::fail(404, "Order not found"),
                }
            }
            _ => MockReply::fail(404, "Not found"),
        }
    }

    const fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }
}

fn text(body: Option<&Value>, field: &str) -> Option<String> {
    body?
        .get(field)?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn parse<T: DeserializeOwned>(body: Option<&Value>, field: &str) -> Option<T> {
    serde_json::from_value(body?.get(field)?.clone()).ok()
}

// =============================================================================
// FakeBackend
// =============================================================================

/// A request as the transport saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

/// In-process [`Transport`] over a [`MockShop`].
///
/// Clones share the shop, the request log and the client-side storage.
#[derive(Clone)]
pub struct FakeBackend {
    shop: Arc<Mutex<MockShop>>,
    storage: Arc<MemoryStorage>,
    log: Arc<Mutex<Vec<RecordedRequest>>>,
    holds: Arc<Mutex<Vec<Hold>>>,
    refresh_delay: Duration,
}

/// A one-shot delay, optionally with a canned failure, for one path.
#[derive(Debug, Clone)]
struct Hold {
    path: String,
    delay: Duration,
    fail_with: Option<u16>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    /// Backend with an empty shop.
    #[must_use]
    pub fn new() -> Self {
        Self::from_shop(MockShop::new())
    }

    /// Backend with [`MockShop::with_catalog`].
    #[must_use]
    pub fn with_catalog() -> Self {
        Self::from_shop(MockShop::with_catalog())
    }

    #[must_use]
    pub fn from_shop(shop: MockShop) -> Self {
        Self {
            shop: Arc::new(Mutex::new(shop)),
            storage: Arc::new(MemoryStorage::new()),
            log: Arc::new(Mutex::new(Vec::new())),
            holds: Arc::new(Mutex::new(Vec::new())),
            refresh_delay: Duration::from_millis(20),
        }
    }

    /// How long `/Auth/Refresh` takes to answer.
    #[must_use]
    pub const fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    /// Lock the shop.
    pub fn shop(&self) -> MutexGuard<'_, MockShop> {
        self.shop.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Client-side storage (session and refresh-token cookie).
    #[must_use]
    pub fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.storage) as Arc<dyn Storage>
    }

    /// A gateway over this backend with a fresh session store that shares
    /// this backend's storage.
    #[must_use]
    pub fn gateway(&self) -> (Gateway, SessionStore) {
        let session = SessionStore::new(self.storage());
        session.restore();
        let gateway = Gateway::new(Arc::new(self.clone()), session.clone(), self.storage());
        (gateway, session)
    }

    /// A full container over this backend.
    #[must_use]
    pub fn storefront(&self, widget: ScriptedWidget) -> Storefront {
        Storefront::from_parts(
            Arc::new(self.clone()),
            self.storage(),
            Arc::new(widget),
            StorefrontOptions::default(),
        )
    }

    /// Create the user if needed and establish a session for it without
    /// going through the API. Nothing is recorded.
    ///
    /// # Panics
    ///
    /// Panics on an invalid email.
    pub fn sign_in(&self, gateway: &Gateway, username: &str, email: &str, role: Role) -> Identity {
        let parsed = match Email::parse(email) {
            Ok(parsed) => parsed,
            Err(e) => panic!("sign_in: invalid email {email}: {e}"),
        };
        let (access, refresh) = {
            let mut shop = self.shop();
            let user = shop
                .user_id(email)
                .unwrap_or_else(|| shop.add_user(username, email, DEFAULT_PASSWORD, role));
            shop.issue_tokens(user)
        };
        self.store_cookie(&refresh);

        let identity = Identity {
            username: username.to_string(),
            email: parsed,
            role,
        };
        if let Err(e) = gateway
            .session()
            .establish(Session::new(identity.clone(), SecretString::from(access)))
        {
            panic!("sign_in: could not persist session: {e}");
        }
        identity
    }

    /// Answer the next request to `path` with `status`.
    pub fn fail_next(&self, path: &str, status: u16) {
        self.shop().force(path, status);
    }

    /// Delay the next request to `path` by `delay`. With `fail_with` the
    /// request never reaches the shop and is answered with that status.
    ///
    /// Holds for the same path are consumed in send order.
    pub fn hold_next(&self, path: &str, delay: Duration, fail_with: Option<u16>) {
        self.holds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Hold {
                path: path.to_string(),
                delay,
                fail_with,
            });
    }

    fn take_hold(&self, path: &str) -> Option<Hold> {
        let mut holds = self.holds.lock().unwrap_or_else(PoisonError::into_inner);
        let index = holds
            .iter()
            .position(|hold| hold.path.eq_ignore_ascii_case(path))?;
        Some(holds.remove(index))
    }

    /// Every request sent so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of requests with this method and path.
    #[must_use]
    pub fn count(&self, method: Method, path: &str) -> usize {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.method == method && r.path.eq_ignore_ascii_case(path))
            .count()
    }

    /// Body of the most recent matching request.
    #[must_use]
    pub fn last_body(&self, method: Method, path: &str) -> Option<Value> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|r| r.method == method && r.path.eq_ignore_ascii_case(path))
            .and_then(|r| r.body.clone())
    }

    fn store_cookie(&self, value: &str) {
        let result = if value.is_empty() {
            self.storage.remove(keys::REFRESH_TOKEN_COOKIE)
        } else {
            self.storage.set(keys::REFRESH_TOKEN_COOKIE, value)
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to store refresh token cookie");
        }
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let bearer = request
            .bearer
            .as_ref()
            .map(|token| token.expose_secret().to_owned());
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                method: request.method.clone(),
                path: request.path.clone(),
                bearer: bearer.clone(),
                body: request.body.clone(),
            });

        let hold = self.take_hold(&request.path);
        if let Some(hold) = &hold {
            tokio::time::sleep(hold.delay).await;
        } else if request.path.eq_ignore_ascii_case(crate::gateway::REFRESH_PATH) {
            tokio::time::sleep(self.refresh_delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        let reply = match hold.and_then(|hold| hold.fail_with) {
            Some(status) => MockReply::fail(status, "Injected failure"),
            None => self.shop().handle(
                &request.method,
                &request.path,
                bearer.as_deref(),
                request.body.as_ref(),
            ),
        };
        if let Some(cookie) = &reply.set_cookie {
            self.store_cookie(cookie);
        }

        let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = reply.body.map(|b| b.to_string()).unwrap_or_default();
        Ok(HttpResponse::new(status, body))
    }
}

// =============================================================================
// ScriptedWidget
// =============================================================================

#[derive(Debug, Clone)]
enum Script {
    Complete,
    Fail(String),
}

/// Payment widget with a fixed outcome.
///
/// A completing widget issues `pay_<provider order>` and the signature
/// [`MockShop`] accepts.
#[derive(Debug)]
pub struct ScriptedWidget {
    script: Script,
    delay: Duration,
    opened: Mutex<Vec<WidgetOptions>>,
}

impl ScriptedWidget {
    #[must_use]
    pub const fn completing() -> Self {
        Self {
            script: Script::Complete,
            delay: Duration::ZERO,
            opened: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn failing(reason: &str) -> Self {
        Self {
            script: Script::Fail(reason.to_string()),
            delay: Duration::ZERO,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Keep the widget open this long before resolving.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Options of every `open` call.
    #[must_use]
    pub fn opened(&self) -> Vec<WidgetOptions> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PaymentWidget for ScriptedWidget {
    async fn open(&self, options: WidgetOptions) -> WidgetOutcome {
        let provider_order = options.order_id.clone();
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(options);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.script {
            Script::Complete => WidgetOutcome::Completed(ProviderPayment {
                payment_id: format!("pay_{provider_order}"),
                signature: format!("sig_{provider_order}"),
                order_id: provider_order,
            }),
            Script::Fail(reason) => WidgetOutcome::Failed {
                reason: reason.clone(),
            },
        }
    }
}

//! Cache key conventions: `<entity>_<id>` for single rows, `all_<entity>`
//! for collections and `<parent>_<entity>_<parentID>` for secondary indexes.

pub const ALL_ORDERS: &str = "all_orders";
pub const ALL_RETURNS: &str = "all_returns";
pub const ALL_USERS: &str = "all_users";
pub const ALL_PACKAGING: &str = "all_packaging";
pub const ALL_STATUSES: &str = "all_statuses";
pub const ALL_REASONS: &str = "all_reasons";

pub fn order(order_id: i64) -> String {
    format!("order_{order_id}")
}

pub fn user_orders(user_id: i64) -> String {
    format!("user_orders_{user_id}")
}

/// Returns are keyed by the order they belong to.
pub fn order_return(order_id: i64) -> String {
    format!("return_{order_id}")
}

pub fn user_returns(user_id: i64) -> String {
    format!("user_returns_{user_id}")
}

pub fn user(user_id: i64) -> String {
    format!("user_{user_id}")
}

pub fn packaging(packaging_id: i64) -> String {
    format!("packaging_{packaging_id}")
}

pub fn status(status_id: i64) -> String {
    format!("status_{status_id}")
}

pub fn reason(reason_id: i64) -> String {
    format!("reason_{reason_id}")
}

/// Every key that may hold `order` or a collection containing it.
pub fn order_keys(order_id: i64, user_id: i64) -> Vec<String> {
    vec![order(order_id), ALL_ORDERS.to_string(), user_orders(user_id)]
}

/// Every key that may hold the return of `order_id` or a collection
/// containing it.
pub fn return_keys(order_id: i64, user_id: i64) -> Vec<String> {
    vec![
        order_return(order_id),
        ALL_RETURNS.to_string(),
        user_returns(user_id),
    ]
}

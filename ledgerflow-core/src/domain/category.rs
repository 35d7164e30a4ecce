//! Category taxonomy and the per-description category cache

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved general/detailed label for anything the classifier can't place
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Static two-level taxonomy, in seeding order
pub const TAXONOMY: &[(&str, &[&str])] = &[
    ("Groceries", &["Supermarkets", "Convenience Stores", "Specialty Food Stores"]),
    (
        "Dining & Restaurants",
        &["Coffee Shops", "Fast Food", "Takeout & Delivery", "Sit-down Restaurants"],
    ),
    (
        "Shopping",
        &[
            "Clothing",
            "Electronics",
            "Online Retail",
            "Department Stores",
            "Gifts",
            "Beauty & Cosmetics",
        ],
    ),
    ("Personal Care", &["Salons & Spas", "Barbershops", "Skincare & Grooming"]),
    (
        "Housing & Utilities",
        &[
            "Rent / Mortgage",
            "Electricity",
            "Water",
            "Gas",
            "Internet",
            "Phone",
            "Trash & Recycling",
            "Home Supplies & Repairs",
        ],
    ),
    (
        "Transportation",
        &[
            "Gas & Fuel",
            "Rideshare",
            "Public Transit",
            "Parking",
            "Tolls",
            "Vehicle Maintenance",
            "Car Insurance",
        ],
    ),
    (
        "Financial",
        &[
            "Credit Card Payments",
            "Bank Fees",
            "Investments",
            "Interest / Dividends",
            "Loan Payments",
            "RRSP/TFSA Contributions",
        ],
    ),
    (
        "Health & Wellness",
        &["Pharmacy", "Medical & Dental", "Health Insurance", "Gym / Fitness", "Sports"],
    ),
    (
        "Lifestyle & Entertainment",
        &[
            "Streaming Services",
            "Movies & Events",
            "Travel",
            "Airbnb",
            "Subscriptions & Hobbies",
            "Vacation Spending",
        ],
    ),
    ("Education", &["Tuition", "Online Courses", "Books & Materials"]),
    (
        "Income & Transfers",
        &[
            "Salary / Paycheck",
            "Cash Back / Rewards",
            "Internal Transfers",
            "Refunds & Reimbursements",
        ],
    ),
    (
        "Work & Business",
        &["Business Travel", "Meals", "Contractor Income", "Software / Tools"],
    ),
    (UNCATEGORIZED, &[UNCATEGORIZED]),
];

/// A row of `dim_categories`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Category {
    pub category_id: String,
    pub general_category: String,
    pub detailed_category: String,
    pub is_active: bool,
}

/// Flatten the taxonomy into `dim_categories` rows with ids `cat_001..`
pub fn taxonomy_rows() -> Vec<Category> {
    TAXONOMY
        .iter()
        .flat_map(|(general, details)| details.iter().map(move |detailed| (*general, *detailed)))
        .enumerate()
        .map(|(i, (general, detailed))| Category {
            category_id: format!("cat_{:03}", i + 1),
            general_category: general.to_string(),
            detailed_category: detailed.to_string(),
            is_active: true,
        })
        .collect()
}

/// Normalized description used as the cache key: trimmed and uppercased
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescriptionKey(String);

impl DescriptionKey {
    /// Normalize a raw description. Returns None when nothing is left after trimming.
    pub fn normalize(description: &str) -> Option<Self> {
        let key = description.trim().to_uppercase();
        if key.is_empty() {
            None
        } else {
            Some(Self(key))
        }
    }

    /// Wrap a key that is already normalized (read back from the warehouse)
    pub fn from_normalized(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DescriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Classifier output for one description, before it is persisted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Categorization {
    pub description_key: DescriptionKey,
    pub original_description: String,
    pub general_category: String,
    pub detailed_category: String,
    pub confidence_score: f64,
    pub model_version: String,
}

impl Categorization {
    /// The fallback used whenever the model call or its output is unusable
    pub fn uncategorized(key: &DescriptionKey, model_version: &str) -> Self {
        Self {
            description_key: key.clone(),
            original_description: key.as_str().to_string(),
            general_category: UNCATEGORIZED.to_string(),
            detailed_category: UNCATEGORIZED.to_string(),
            confidence_score: 0.0,
            model_version: model_version.to_string(),
        }
    }

    pub fn is_uncategorized(&self) -> bool {
        self.general_category == UNCATEGORIZED && self.detailed_category == UNCATEGORIZED
    }
}

/// A persisted row of `dim_description_categories`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryCacheEntry {
    pub description_key: DescriptionKey,
    pub original_description: String,
    pub general_category: String,
    pub detailed_category: String,
    pub confidence_score: f64,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CategoryCacheEntry {
    pub fn stamped(categorization: Categorization, now: DateTime<Utc>) -> Self {
        Self {
            description_key: categorization.description_key,
            original_description: categorization.original_description,
            general_category: categorization.general_category,
            detailed_category: categorization.detailed_category,
            confidence_score: categorization.confidence_score,
            model_version: categorization.model_version,
            created_at: now,
            updated_at: now,
        }
    }
}

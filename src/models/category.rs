use serde::{Deserialize, Serialize};

/// A local record table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Tasks,
    Logs,
    Reviews,
    Templates,
    Habits,
    HabitLogs,
    Projects,
    BigGoals,
    SmallGoals,
}

impl Table {
    pub fn all() -> &'static [Table] {
        static ALL: [Table; 9] = [
            Table::Tasks,
            Table::Logs,
            Table::Reviews,
            Table::Templates,
            Table::Habits,
            Table::HabitLogs,
            Table::Projects,
            Table::BigGoals,
            Table::SmallGoals,
        ];
        &ALL
    }

    /// SQLite table name
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Tasks => "tasks",
            Table::Logs => "logs",
            Table::Reviews => "reviews",
            Table::Templates => "templates",
            Table::Habits => "habits",
            Table::HabitLogs => "habit_logs",
            Table::Projects => "projects",
            Table::BigGoals => "big_goals",
            Table::SmallGoals => "small_goals",
        }
    }

    /// Key of this table inside object-shaped shards and legacy files
    pub fn json_key(&self) -> &'static str {
        match self {
            Table::Tasks => "tasks",
            Table::Logs => "logs",
            Table::Reviews => "reviews",
            Table::Templates => "templates",
            Table::Habits => "habits",
            Table::HabitLogs => "habitLogs",
            Table::Projects => "projects",
            Table::BigGoals => "bigGoals",
            Table::SmallGoals => "smallGoals",
        }
    }

    /// Field carrying a unique index from older schemas (templates were unique by name)
    pub fn unique_field(&self) -> Option<&'static str> {
        match self {
            Table::Templates => Some("name"),
            _ => None,
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Table::Tasks => Category::Todo,
            Table::Logs => Category::Accounting,
            Table::Reviews => Category::Reviews,
            Table::Templates => Category::Templates,
            Table::Habits | Table::HabitLogs => Category::Habits,
            Table::Projects | Table::BigGoals | Table::SmallGoals => Category::Projects,
        }
    }

    pub fn is_date_scoped(&self) -> bool {
        self.category().is_date_scoped()
    }
}

/// Unit of remote sharding: one aggregate file, or one file per ISO week
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Todo,
    Habits,
    Projects,
    Templates,
    Accounting,
    Reviews,
}

impl Category {
    pub fn all() -> &'static [Category] {
        static ALL: [Category; 6] = [
            Category::Todo,
            Category::Habits,
            Category::Projects,
            Category::Templates,
            Category::Accounting,
            Category::Reviews,
        ];
        &ALL
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Todo => "todo",
            Category::Habits => "habits",
            Category::Projects => "projects",
            Category::Templates => "templates",
            Category::Accounting => "accounting",
            Category::Reviews => "reviews",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Category::all().iter().copied().find(|c| c.as_str() == s)
    }

    /// Tables stored in this category's shard, primary table first
    pub fn tables(&self) -> &'static [Table] {
        match self {
            Category::Todo => &[Table::Tasks],
            Category::Habits => &[Table::Habits, Table::HabitLogs],
            Category::Projects => &[Table::Projects, Table::BigGoals, Table::SmallGoals],
            Category::Templates => &[Table::Templates],
            Category::Accounting => &[Table::Logs],
            Category::Reviews => &[Table::Reviews],
        }
    }

    pub fn primary_table(&self) -> Table {
        self.tables()[0]
    }

    /// Shards of multi-table categories are objects of named arrays
    pub fn is_object_shaped(&self) -> bool {
        self.tables().len() > 1
    }

    /// High-volume categories get one shard per ISO week
    pub fn is_date_scoped(&self) -> bool {
        matches!(self, Category::Accounting | Category::Reviews)
    }
}

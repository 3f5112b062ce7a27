use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Abstract functions and operators a query graph may apply to features.
#[derive(
    Debug, Serialize, Deserialize, JsonSchema, Hash, Eq, PartialEq, Clone, Copy, Display, EnumIter,
    EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionSignature {
    // boolean
    And,
    Or,
    Not,
    // comparison
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    IsNull,
    IsNotNull,
    Like,
    LikeCaseInsensitive,
    // integer arithmetic
    AddInteger,
    SubtractInteger,
    MultiplyInteger,
    DivideInteger,
    ModuloInteger,
    NegateInteger,
    // decimal arithmetic
    AddDecimal,
    SubtractDecimal,
    MultiplyDecimal,
    DivideDecimal,
    NegateDecimal,
    RoundDecimal,
    AbsDecimal,
    FloorDecimal,
    CeilDecimal,
    ToDecimal,
    // conversion
    ToString,
    StringToInteger,
    // string
    Concat,
    Upper,
    Lower,
    Trim,
    Length,
    Substring,
    IndexOf,
    StartsWith,
    EndsWith,
    Contains,
    MatchesRegex,
    Replace,
    LeftPad,
    RightPad,
    // date and time
    CurrentDate,
    CurrentDateTime,
    Date,
    DateTime,
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    DayOfWeek,
    DateOf,
    LastDayOfMonth,
    DifferenceDays,
    DifferenceHours,
    DifferenceMinutes,
    DifferenceSeconds,
    DifferenceMonths,
    DifferenceYears,
    AddDate,
    AddDateTime,
    AddMonths,
    // aggregates
    Count,
    CountDistinct,
    Sum,
    Average,
    Minimum,
    Maximum,
    // other
    CaseWhen,
    Coalesce,
    InstanceOf,
    TypeOf,
    Undefined,
    EnumToString,
}

/// The parameters a signature expects, by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Named(&'static [&'static str]),
    /// Any number of parameters, taken in insertion order.
    Variadic { min: usize },
}

impl FunctionSignature {
    pub fn arity(&self) -> Arity {
        use FunctionSignature as FS;
        const NONE: &[&str] = &[];
        const VALUE: &[&str] = &["value"];
        const BINARY: &[&str] = &["left", "right"];
        match self {
            FS::And | FS::Or => Arity::Variadic { min: 1 },
            FS::Concat | FS::Coalesce => Arity::Variadic { min: 1 },
            FS::Not
            | FS::IsNull
            | FS::IsNotNull
            | FS::NegateInteger
            | FS::NegateDecimal
            | FS::AbsDecimal
            | FS::FloorDecimal
            | FS::CeilDecimal
            | FS::ToDecimal
            | FS::ToString
            | FS::StringToInteger
            | FS::Upper
            | FS::Lower
            | FS::Trim
            | FS::Length
            | FS::Year
            | FS::Month
            | FS::Day
            | FS::Hour
            | FS::Minute
            | FS::Second
            | FS::DayOfWeek
            | FS::DateOf
            | FS::LastDayOfMonth
            | FS::Count
            | FS::CountDistinct
            | FS::Sum
            | FS::Average
            | FS::Minimum
            | FS::Maximum
            | FS::EnumToString => Arity::Named(VALUE),
            FS::Equals
            | FS::NotEquals
            | FS::GreaterThan
            | FS::GreaterThanOrEqual
            | FS::LessThan
            | FS::LessThanOrEqual
            | FS::AddInteger
            | FS::SubtractInteger
            | FS::MultiplyInteger
            | FS::DivideInteger
            | FS::ModuloInteger
            | FS::AddDecimal
            | FS::SubtractDecimal
            | FS::MultiplyDecimal
            | FS::DivideDecimal => Arity::Named(BINARY),
            FS::Like | FS::LikeCaseInsensitive | FS::MatchesRegex => {
                Arity::Named(&["value", "pattern"])
            }
            FS::RoundDecimal => Arity::Named(&["value", "digits"]),
            FS::Substring => Arity::Named(&["value", "start", "length"]),
            FS::IndexOf | FS::Contains => Arity::Named(&["value", "search"]),
            FS::StartsWith => Arity::Named(&["value", "prefix"]),
            FS::EndsWith => Arity::Named(&["value", "suffix"]),
            FS::Replace => Arity::Named(&["value", "search", "replacement"]),
            FS::LeftPad | FS::RightPad => Arity::Named(&["value", "length", "fill"]),
            FS::CurrentDate | FS::CurrentDateTime | FS::Undefined => Arity::Named(NONE),
            FS::Date => Arity::Named(&["year", "month", "day"]),
            FS::DateTime => Arity::Named(&["year", "month", "day", "hour", "minute", "second"]),
            FS::DifferenceDays
            | FS::DifferenceHours
            | FS::DifferenceMinutes
            | FS::DifferenceSeconds
            | FS::DifferenceMonths
            | FS::DifferenceYears => Arity::Named(&["from", "to"]),
            FS::AddDate => Arity::Named(&["date", "days"]),
            FS::AddDateTime => Arity::Named(&["date_time", "seconds"]),
            FS::AddMonths => Arity::Named(&["date", "months"]),
            FS::CaseWhen => Arity::Named(&["condition", "then", "else"]),
            FS::InstanceOf | FS::TypeOf => Arity::Named(&["object", "type"]),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        use FunctionSignature as FS;
        matches!(
            self,
            FS::Count | FS::CountDistinct | FS::Sum | FS::Average | FS::Minimum | FS::Maximum
        )
    }

    pub fn is_decimal_arithmetic(&self) -> bool {
        use FunctionSignature as FS;
        matches!(
            self,
            FS::AddDecimal
                | FS::SubtractDecimal
                | FS::MultiplyDecimal
                | FS::DivideDecimal
                | FS::NegateDecimal
                | FS::RoundDecimal
                | FS::AbsDecimal
                | FS::FloorDecimal
                | FS::CeilDecimal
                | FS::ToDecimal
        )
    }
}

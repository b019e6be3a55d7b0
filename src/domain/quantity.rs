//! CPU 與記憶體數量：解析、依倍率縮放（向下取整到最小單位）、格式化。

use std::fmt;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;
const TIB: u64 = 1024 * GIB;
const KB: u64 = 1000;
const MB: u64 = 1000 * KB;
const GB: u64 = 1000 * MB;
const TB: u64 = 1000 * GB;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CpuStyle {
    Cores,
    Millicores,
}

/// CPU 數量，以 millicore 為最小單位；保留輸入的書寫方式（`0.5` 或 `500m`）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuQuantity {
    millis: u64,
    style: CpuStyle,
}

impl CpuQuantity {
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if let Some(millis) = text.strip_suffix('m') {
            let millis = millis
                .parse::<u64>()
                .map_err(|_| format!("invalid cpu quantity '{}'", text))?;
            return Self::checked(millis, CpuStyle::Millicores, text);
        }

        let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));
        if fraction.len() > 3 || (whole.is_empty() && fraction.is_empty()) {
            return Err(format!(
                "invalid cpu quantity '{}' (at most millicore precision)",
                text
            ));
        }
        let whole = if whole.is_empty() {
            0
        } else {
            whole
                .parse::<u64>()
                .map_err(|_| format!("invalid cpu quantity '{}'", text))?
        };
        let fraction_millis = if fraction.is_empty() {
            0
        } else {
            let padded = format!("{:0<3}", fraction);
            padded
                .parse::<u64>()
                .map_err(|_| format!("invalid cpu quantity '{}'", text))?
        };
        let millis = whole
            .checked_mul(1000)
            .and_then(|m| m.checked_add(fraction_millis))
            .ok_or_else(|| format!("cpu quantity '{}' is too large", text))?;
        Self::checked(millis, CpuStyle::Cores, text)
    }

    fn checked(millis: u64, style: CpuStyle, text: &str) -> Result<Self, String> {
        if millis == 0 {
            return Err(format!("cpu quantity '{}' must be positive", text));
        }
        Ok(Self { millis, style })
    }

    pub fn millis(&self) -> u64 {
        self.millis
    }

    /// 依倍率縮放，向下取整到 1m，最少 1m
    pub fn scale(&self, multiplier: f64) -> Self {
        let scaled = (self.millis as f64 * multiplier).floor() as u64;
        Self {
            millis: scaled.max(1),
            style: self.style,
        }
    }

    /// Compose 的 `cpus` 欄位一律使用核心數
    pub fn as_cores(&self) -> String {
        format_cores(self.millis)
    }
}

fn format_cores(millis: u64) -> String {
    let whole = millis / 1000;
    let fraction = millis % 1000;
    if fraction == 0 {
        whole.to_string()
    } else {
        let digits = format!("{:03}", fraction);
        format!("{}.{}", whole, digits.trim_end_matches('0'))
    }
}

impl fmt::Display for CpuQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.style {
            CpuStyle::Cores => f.write_str(&format_cores(self.millis)),
            CpuStyle::Millicores => write!(f, "{}m", self.millis),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemoryFamily {
    Binary,
    Decimal,
}

impl MemoryFamily {
    fn increment(&self) -> u64 {
        match self {
            Self::Binary => MIB,
            Self::Decimal => MB,
        }
    }
}

/// 記憶體數量（位元組），二進位單位以 1Mi、十進位單位以 1M 為最小增量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryQuantity {
    bytes: u64,
    family: MemoryFamily,
}

impl MemoryQuantity {
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        let split = text
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(text.len());
        let (number, unit) = text.split_at(split);
        let (unit_bytes, family) = match unit {
            "" => (1, MemoryFamily::Binary),
            "Ki" => (KIB, MemoryFamily::Binary),
            "Mi" => (MIB, MemoryFamily::Binary),
            "Gi" => (GIB, MemoryFamily::Binary),
            "Ti" => (TIB, MemoryFamily::Binary),
            "K" | "k" => (KB, MemoryFamily::Decimal),
            "M" => (MB, MemoryFamily::Decimal),
            "G" => (GB, MemoryFamily::Decimal),
            "T" => (TB, MemoryFamily::Decimal),
            other => {
                return Err(format!(
                    "invalid memory unit '{}' in '{}' (use Ki, Mi, Gi, Ti, K, M, G or T)",
                    other, text
                ))
            }
        };
        let value = number
            .parse::<f64>()
            .map_err(|_| format!("invalid memory quantity '{}'", text))?;
        let bytes = (value * unit_bytes as f64).floor() as u64;
        if bytes == 0 {
            return Err(format!("memory quantity '{}' must be positive", text));
        }
        Ok(Self { bytes, family })
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// 依倍率縮放，向下取整到最小增量，最少一個增量；結果不超過原值
    pub fn scale(&self, multiplier: f64) -> Self {
        if multiplier == 1.0 {
            return *self;
        }
        let increment = self.family.increment();
        let scaled = (self.bytes as f64 * multiplier).floor() as u64;
        Self {
            bytes: (scaled / increment * increment)
                .max(increment)
                .min(self.bytes),
            family: self.family,
        }
    }

    /// Docker 的記憶體寫法（`k`/`m`/`g` 皆為二進位單位）
    pub fn as_docker(&self) -> String {
        if self.bytes % GIB == 0 {
            format!("{}G", self.bytes / GIB)
        } else if self.bytes % MIB == 0 {
            format!("{}M", self.bytes / MIB)
        } else if self.bytes % KIB == 0 {
            format!("{}k", self.bytes / KIB)
        } else {
            self.bytes.to_string()
        }
    }
}

impl fmt::Display for MemoryQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            MemoryFamily::Binary if self.bytes % GIB == 0 => write!(f, "{}Gi", self.bytes / GIB),
            MemoryFamily::Binary if self.bytes % MIB == 0 => write!(f, "{}Mi", self.bytes / MIB),
            MemoryFamily::Binary if self.bytes % KIB == 0 => write!(f, "{}Ki", self.bytes / KIB),
            MemoryFamily::Binary => write!(f, "{}", self.bytes),
            MemoryFamily::Decimal if self.bytes % GB == 0 => write!(f, "{}G", self.bytes / GB),
            MemoryFamily::Decimal if self.bytes % MB == 0 => write!(f, "{}M", self.bytes / MB),
            MemoryFamily::Decimal => write!(f, "{}K", self.bytes / KB),
        }
    }
}

// ✉️ Fee notices - the message sent to a guardian for a billing period
//
// One template for a single student, one for two siblings billed together.
// Placeholders are filled from a GuardianSummary; payment details come from config.

use crate::roster::Language;
use crate::summary::GuardianSummary;
use crate::temporal::format_display_date;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeLanguage {
    English,
    SimplifiedChinese,
    TraditionalChinese,
}

impl NoticeLanguage {
    pub fn code(&self) -> &'static str {
        match self {
            NoticeLanguage::English => "en",
            NoticeLanguage::SimplifiedChinese => "zh-cn",
            NoticeLanguage::TraditionalChinese => "zh-tw",
        }
    }
}

impl FromStr for NoticeLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "en" | "english" => Ok(NoticeLanguage::English),
            "zh-cn" | "zh" | "chinese" => Ok(NoticeLanguage::SimplifiedChinese),
            "zh-tw" => Ok(NoticeLanguage::TraditionalChinese),
            other => Err(format!("unknown notice language: {}", other)),
        }
    }
}

impl From<Language> for NoticeLanguage {
    fn from(language: Language) -> Self {
        match language {
            Language::English => NoticeLanguage::English,
            Language::Chinese => NoticeLanguage::SimplifiedChinese,
        }
    }
}

/// Where guardians send the money
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub payee: String,
    pub number: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "SGD".to_string()
}

impl Default for PaymentDetails {
    fn default() -> Self {
        PaymentDetails {
            payee: "Tutor".to_string(),
            number: "0000 0000".to_string(),
            currency: default_currency(),
        }
    }
}

// ============================================================================
// TEMPLATES
// ============================================================================

const EN_SINGLE: &str = "Hi [Parent], here is [Name]'s tuition fee update for [First Date] – [Last Date]:
• Rate: [Currency] [Average Fee]/hour
• Total lesson hours: [Hours] hours

[Hours] hours × [Currency] [Average Fee]/hour = [Currency] [Total Fee]

Please pay via PayNow to [Payee] ([Number]) and include \"[Name] + tuition month/year\" in the remarks.

Thank you!";

const EN_MULTIPLE: &str = "Hi [Parent], here is the tuition fee update for [Name1] and [Name2] for [First Date] – [Last Date]:
• [Name1]: [Currency] [Average Fee]/hour, [Hours1] hours
• [Name2]: [Currency] [Average Fee]/hour, [Hours2] hours
• Total payable: [Currency] [Total Fee]

Please pay via PayNow to [Payee] ([Number]) and include \"[Name1] & [Name2] + tuition month/year\" in the remarks.

Thank you!";

const ZH_CN_SINGLE: &str = "[Parent] 你好，以下是[Name]在 [First Date] – [Last Date] 期间的学费：
• 费率：[Currency] [Average Fee]/小时
• 总课时：[Hours] 小时

[Hours] 小时 × [Currency] [Average Fee]/小时 = [Currency] [Total Fee]

请通过 PayNow 付款给 [Payee]（[Number]），并在备注中注明“[Name] + 学费月份/年份”。

谢谢！";

const ZH_CN_MULTIPLE: &str = "[Parent] 你好，以下是[Name1]和[Name2]在 [First Date] – [Last Date] 期间的学费：
• [Name1]：[Currency] [Average Fee]/小时，[Hours1] 小时
• [Name2]：[Currency] [Average Fee]/小时，[Hours2] 小时
• 应付总额：[Currency] [Total Fee]

请通过 PayNow 付款给 [Payee]（[Number]），并在备注中注明“[Name1] 和 [Name2] + 学费月份/年份”。

谢谢！";

const ZH_TW_SINGLE: &str = "[Parent] 你好，以下是[Name]在 [First Date] – [Last Date] 期間的學費：
• 費率：[Currency] [Average Fee]/小時
• 總課時：[Hours] 小時

[Hours] 小時 × [Currency] [Average Fee]/小時 = [Currency] [Total Fee]

請通過 PayNow 付款給 [Payee]（[Number]），並在備註中註明「[Name] + 學費月份/年份」。

謝謝！";

const ZH_TW_MULTIPLE: &str = "[Parent] 你好，以下是[Name1]和[Name2]在 [First Date] – [Last Date] 期間的學費：
• [Name1]：[Currency] [Average Fee]/小時，[Hours1] 小時
• [Name2]：[Currency] [Average Fee]/小時，[Hours2] 小時
• 應付總額：[Currency] [Total Fee]

請通過 PayNow 付款給 [Payee]（[Number]），並在備註中註明「[Name1] 和 [Name2] + 學費月份/年份」。

謝謝！";

fn template(language: NoticeLanguage, multiple: bool) -> &'static str {
    match (language, multiple) {
        (NoticeLanguage::English, false) => EN_SINGLE,
        (NoticeLanguage::English, true) => EN_MULTIPLE,
        (NoticeLanguage::SimplifiedChinese, false) => ZH_CN_SINGLE,
        (NoticeLanguage::SimplifiedChinese, true) => ZH_CN_MULTIPLE,
        (NoticeLanguage::TraditionalChinese, false) => ZH_TW_SINGLE,
        (NoticeLanguage::TraditionalChinese, true) => ZH_TW_MULTIPLE,
    }
}

// ============================================================================
// RENDERING
// ============================================================================

/// Fill the notice for `summary`; None when there is nothing to bill
///
/// More than two students still use the two-student template with the first two
/// names; the total covers everyone.
pub fn render_notice(
    summary: &GuardianSummary,
    language: NoticeLanguage,
    payment: &PaymentDetails,
) -> Option<String> {
    if summary.records.is_empty() || summary.students.is_empty() {
        return None;
    }

    let multiple = summary.students.len() > 1;
    let mut text = template(language, multiple)
        .replace("[Parent]", &summary.guardian)
        .replace("[Average Fee]", &format!("{:.2}", summary.average_fee))
        .replace("[Total Fee]", &format!("{:.2}", summary.total_fee))
        .replace("[First Date]", &format_display_date(summary.first_date))
        .replace("[Last Date]", &format_display_date(summary.last_date))
        .replace("[Currency]", &payment.currency)
        .replace("[Payee]", &payment.payee)
        .replace("[Number]", &payment.number);

    if multiple {
        let first = &summary.students[0];
        let second = &summary.students[1];
        text = text
            .replace("[Name1]", first)
            .replace("[Name2]", second)
            .replace("[Hours1]", &format!("{:.1}", summary.hours_for(first)))
            .replace("[Hours2]", &format!("{:.1}", summary.hours_for(second)));
    } else {
        text = text
            .replace("[Name]", &summary.students[0])
            .replace("[Hours]", &format!("{:.1}", summary.total_hours));
    }

    Some(text)
}

use crate::api::announcement::AnnouncementFilter;
use crate::api::fee_outline::{AcademicYearQuery, FeeOutlineFilter};
use crate::api::message::InboxFilter;
use crate::api::salary::{HistoryQuery, PeriodQuery, SalaryFilter, SalaryHistory, StatusUpdate};
use crate::model::announcement::{
    Announcement, AnnouncementDraft, AnnouncementPatch, AnnouncementStatus, Audience,
    CreateAnnouncement, Priority, ReadStats,
};
use crate::model::fee_outline::{
    Concession, ConcessionName, DiscountType, DuplicateOverrides, FeeComponent, FeeComponentName,
    FeeOutline, FeeOutlineDraft, FeeOutlinePatch, Installment, LateFeeStructure, LateFeeType,
};
use crate::model::message::{Message, MessagePriority, MessageType, SendMessage};
use crate::model::salary::{
    Allowances, ComponentTotals, Deductions, PayrollReport, SalaryInput, SalaryPatch,
    SalaryRecord, SalaryStats, SalaryStatus, StatusCount, TrendPoint, YearlySummary,
};
use crate::model::school_class::SchoolClass;
use crate::utils::pagination::{AnnouncementList, FeeOutlineList, MessageList, PageQuery, SalaryList};
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "School Administration API",
        version = "1.0.0",
        description = r#"
## School Administration Service

Back office API for a school: fee structures, staff payroll, announcements and
direct messages to students.

### 🔹 Key Features
- **Fee Outlines**
  - Per class and academic year fee structures with components, installments,
    concessions and late fees. One default outline per class and year.
- **Salaries**
  - Monthly salary records with server computed gross and net pay, status
    workflow, payroll reports and yearly summaries
- **Announcements**
  - Audience targeting (everyone, role groups, classes, individuals), read
    receipts and read statistics
- **Messages**
  - Staff to student messages including fee reminders, inbox and unread count

### 🔐 Security
Endpoints under `/api/v1` require a **JWT Bearer** access token from `/auth/login`.
Fee and payroll writes are limited to **Admin** and **Staff**.

### 📦 Response Format
- Lists return `{ data, page, limit, total }`
- Errors return `{ error, message }` where `error` is one of
  `validation_failed`, `not_found`, `duplicate_record`, `conflict`, `no_data`, `server_fault`
"#,
    ),
    paths(
        crate::api::fee_outline::create_fee_outline,
        crate::api::fee_outline::get_fee_outline,
        crate::api::fee_outline::list_fee_outlines,
        crate::api::fee_outline::update_fee_outline,
        crate::api::fee_outline::delete_fee_outline,
        crate::api::fee_outline::list_by_class,
        crate::api::fee_outline::get_default,
        crate::api::fee_outline::duplicate_fee_outline,

        crate::api::salary::create_salary,
        crate::api::salary::get_salary,
        crate::api::salary::list_salaries,
        crate::api::salary::salary_history,
        crate::api::salary::update_salary,
        crate::api::salary::update_salary_status,
        crate::api::salary::delete_salary,
        crate::api::salary::payroll_report,
        crate::api::salary::salary_stats,

        crate::api::announcement::create_announcement,
        crate::api::announcement::get_announcement,
        crate::api::announcement::list_announcements,
        crate::api::announcement::list_for_user,
        crate::api::announcement::update_announcement,
        crate::api::announcement::delete_announcement,
        crate::api::announcement::toggle_pin,
        crate::api::announcement::mark_read,
        crate::api::announcement::read_stats,

        crate::api::message::send_message,
        crate::api::message::list_inbox,
        crate::api::message::list_sent,
        crate::api::message::mark_read,
        crate::api::message::delete_message,
        crate::api::message::unread_count,

        crate::api::school_class::list_classes
    ),
    components(
        schemas(
            FeeComponentName,
            FeeComponent,
            Installment,
            ConcessionName,
            DiscountType,
            Concession,
            LateFeeType,
            LateFeeStructure,
            FeeOutlineDraft,
            FeeOutlinePatch,
            DuplicateOverrides,
            FeeOutline,
            FeeOutlineList,
            FeeOutlineFilter,
            AcademicYearQuery,
            Allowances,
            Deductions,
            SalaryStatus,
            SalaryInput,
            SalaryPatch,
            SalaryRecord,
            SalaryList,
            SalaryFilter,
            StatusUpdate,
            SalaryHistory,
            YearlySummary,
            ComponentTotals,
            StatusCount,
            PayrollReport,
            PeriodQuery,
            HistoryQuery,
            TrendPoint,
            SalaryStats,
            Audience,
            Priority,
            AnnouncementStatus,
            AnnouncementDraft,
            CreateAnnouncement,
            AnnouncementPatch,
            Announcement,
            AnnouncementList,
            AnnouncementFilter,
            ReadStats,
            MessageType,
            MessagePriority,
            SendMessage,
            Message,
            MessageList,
            InboxFilter,
            PageQuery,
            SchoolClass
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Fee Outline", description = "Fee structure APIs"),
        (name = "Salary", description = "Salary and payroll APIs"),
        (name = "Announcement", description = "Announcement and read receipt APIs"),
        (name = "Message", description = "Staff to student messaging APIs"),
        (name = "Class", description = "Class lookup"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

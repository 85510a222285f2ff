//! User-visible strings. The app speaks Arabic.

pub const GREETING: &str = "مرحبًا! أنا مساعدك الذكي. كيف يمكنني مساعدتك اليوم؟";
pub const CHAT_FAILURE: &str = "عفوًا، حدث خطأ ما. الرجاء المحاولة مرة أخرى.";
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "أنت مساعد ذكي ومفيد. تحدث باللغة العربية.";

pub const SPEECH_UNSUPPORTED: &str = "خاصية التعرف على الصوت غير مدعومة في هذا المتصفح.";
pub const SPEECH_ALREADY_STARTED: &str = "بدأ التعرف على الصوت بالفعل.";

pub fn speech_error(code: &str) -> String {
    format!("خطأ في التعرف على الصوت: {code}")
}

pub const IMAGE_TOO_LARGE: &str = "حجم الملف كبير جدًا. الرجاء اختيار صورة أصغر من 4 ميجابايت.";
pub const IMAGE_UNSUPPORTED_FORMAT: &str = "صيغة الملف غير مدعومة. الرجاء اختيار صورة PNG أو JPG أو WEBP.";
pub const IMAGE_MISSING_INPUT: &str = "الرجاء رفع صورة وكتابة طلب التعديل.";
pub const IMAGE_NO_RESULT: &str = "لم يتمكن النموذج من تعديل الصورة. حاول مرة أخرى بطلب مختلف.";
pub const IMAGE_REMOTE_FAILURE: &str = "حدث خطأ أثناء معالجة الصورة. الرجاء المحاولة مرة أخرى.";
pub const IMAGE_READ_FAILURE: &str = "تعذر قراءة الملف. الرجاء المحاولة مرة أخرى.";

/// Joined in front of the quoted overlay texts.
pub const OVERLAY_TEXTS_PREFIX: &str = "بالإضافة إلى ذلك، قم بإضافة النصوص التالية إلى الصورة:";

pub const INPUT_PROMPT: &str = "اكتب رسالتك هنا...";
pub const LISTENING: &str = "جاري الاستماع...";
pub const STOPPED_LISTENING: &str = "تم إيقاف الاستماع.";
pub const EDIT_IN_PROGRESS: &str = "جاري الإنشاء...";
pub const EDIT_SAVED: &str = "تم حفظ الصورة المعدلة في";
